//! Upstream token handshakes.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use super::{AccessToken, ApiToken, TokenExchange};
use crate::http::HttpError;

/// ESP endpoint that authorizes an API token.
pub const ESP_TOKEN_URL: &str = "https://auth.esp.vmware.com/api/auth/v1/api-tokens/authorize";

/// Body returned by both the ESP and CSP token endpoints.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges an ESP API token for an access token.
///
/// `POST <auth_url>` with the form body `refresh_token=<api token>`.
pub struct EspTokenExchange {
    client: Client,
    auth_url: String,
}

impl EspTokenExchange {
    pub fn new(client: Client, auth_url: Option<String>) -> Self {
        let auth_url = auth_url.unwrap_or_else(|| ESP_TOKEN_URL.to_string());
        Self { client, auth_url }
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }
}

#[async_trait]
impl TokenExchange for EspTokenExchange {
    #[tracing::instrument(skip(self, api_token))]
    async fn exchange(&self, api_token: &ApiToken) -> Result<AccessToken, HttpError> {
        debug!("Authorizing API token {:?} at {}", api_token, self.auth_url);

        let response = self
            .client
            .post(&self.auth_url)
            .form(&[("refresh_token", api_token.expose())])
            .send()
            .await;

        read_token_response(response).await
    }
}

/// OAuth client-credentials handshake against a CSP token endpoint.
///
/// The client secret is the long-lived credential; it is sent with HTTP Basic
/// auth together with `grant_type=client_credentials`.
pub struct ClientCredentialsExchange {
    client: Client,
    token_url: String,
    client_id: String,
}

impl ClientCredentialsExchange {
    pub fn new(client: Client, token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl TokenExchange for ClientCredentialsExchange {
    #[tracing::instrument(skip(self, client_secret))]
    async fn exchange(&self, client_secret: &ApiToken) -> Result<AccessToken, HttpError> {
        debug!(
            "Requesting client-credentials token for {} at {}",
            self.client_id, self.token_url
        );

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(client_secret.expose()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await;

        read_token_response(response).await
    }
}

/// Every failure here is an `Auth` error: handshakes are never retried.
async fn read_token_response(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<AccessToken, HttpError> {
    let response =
        response.map_err(|e| HttpError::Auth(format!("token exchange request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!("Token exchange rejected: HTTP {} {}", status.as_u16(), body);
        return Err(HttpError::Auth(format!(
            "token exchange rejected with HTTP {}",
            status.as_u16()
        )));
    }

    let parsed = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| HttpError::Auth(format!("malformed token exchange response: {}", e)))?;

    if parsed.access_token.is_empty() {
        return Err(HttpError::Auth(
            "token exchange returned an empty access token".to_string(),
        ));
    }

    Ok(AccessToken::with_expiry(parsed.access_token, parsed.expires_in))
}
