//! Service factory for building the token provider and HTTP client.
//!
//! The CLI resolves environment variables; everything arrives here as plain
//! values.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::debug;

use crate::{
    articat::Articat,
    auth::{ApiToken, ClientCredentialsExchange, EspTokenExchange, TokenProvider},
    config::{ClientConfig, ServerTarget},
    http::HttpClient,
};

/// Connection and credential settings gathered from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Server alias or hostname of a custom instance.
    pub server: String,
    pub is_within_envoy: bool,
    pub csp_prod: bool,
    pub esp_api_token: Option<String>,
    /// Overrides the ESP authorize endpoint (or the CSP token endpoint).
    pub auth_url: Option<String>,
    pub csp_client_id: Option<String>,
    pub csp_client_secret: Option<String>,
    /// Sent as `X-CSRF-TOKEN` with every request.
    pub csrf_token: Option<String>,
    pub timeout: Option<Duration>,
}

/// Build the token provider for the selected authentication flow.
///
/// With a CSP client id the client-credentials flow is used; otherwise the
/// ESP API token is exchanged.
pub fn build_token_provider(
    options: &ConnectOptions,
    target: &ServerTarget,
    config: &ClientConfig,
) -> Result<TokenProvider> {
    let client = config.build_client()?;

    match &options.csp_client_id {
        Some(client_id) => {
            let secret = ApiToken::from_optional(options.csp_client_secret.clone());
            if secret.is_none() {
                bail!("--csp-client-secret (or CSP_CLIENT_SECRET) is required with --csp-client-id");
            }
            let token_url = options
                .auth_url
                .clone()
                .unwrap_or_else(|| target.csp_token_url.clone());
            debug!("Using CSP client credentials for {} at {}", client_id, token_url);
            Ok(TokenProvider::new(
                secret,
                ClientCredentialsExchange::new(client, token_url, client_id.clone()),
            ))
        }
        None => {
            let api_token = ApiToken::from_optional(options.esp_api_token.clone());
            debug!("Using ESP API token {:?}", api_token);
            Ok(TokenProvider::new(
                api_token,
                EspTokenExchange::new(client, options.auth_url.clone()),
            ))
        }
    }
}

/// Build an HTTP client for the Articat service on the selected server.
pub fn build_http_client(options: &ConnectOptions) -> Result<HttpClient> {
    let target = ServerTarget::resolve(&options.server, options.is_within_envoy, options.csp_prod);
    let mut config = ClientConfig::for_articat(&target)
        .with_context(|| format!("Invalid server: {}", options.server))?;
    if let Some(timeout) = options.timeout {
        config = config.with_timeout(timeout);
    }
    debug!("Articat root URL: {}", config.base_url);

    let tokens = build_token_provider(options, &target, &config)?;
    let mut http = HttpClient::new(&config, Arc::new(tokens))?;
    if let Some(csrf_token) = &options.csrf_token {
        http.set_csrf(csrf_token)?;
    }
    Ok(http)
}

/// Build the Articat service.
pub fn build_articat(options: &ConnectOptions) -> Result<Articat> {
    Ok(Articat::new(build_http_client(options)?))
}
