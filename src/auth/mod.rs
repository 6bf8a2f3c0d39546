//! Bearer token lifecycle for Helix.
//!
//! A long-lived [`ApiToken`] is exchanged for short-lived [`AccessToken`]s.
//! [`TokenProvider`] caches the current access token and swaps it out when
//! the upstream rejects it.
//!
//! # Structure
//!
//! - `exchange` - Upstream handshakes (ESP API token, CSP client credentials)

mod exchange;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::{Mutex, RwLock};

use crate::http::HttpError;

pub use exchange::{ClientCredentialsExchange, EspTokenExchange, ESP_TOKEN_URL};

/// Shows only enough of a secret to tell two of them apart in logs.
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        return "********".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{}********", prefix)
}

/// Long-lived credential used only to obtain access tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Builds a token from optional input, treating blank strings as absent.
    pub fn from_optional(token: Option<String>) -> Option<Self> {
        token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Self)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiToken({})", mask_secret(&self.0))
    }
}

/// Short-lived bearer credential attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_in: Option<u64>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_in: None,
        }
    }

    pub fn with_expiry(value: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            value: value.into(),
            expires_in,
        }
    }

    /// The raw bearer value, for the `Authorization` header only.
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Lifetime in seconds as reported by the auth endpoint, if it said.
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }

    pub fn masked(&self) -> String {
        mask_secret(&self.value)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &self.masked())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The upstream handshake turning an API token into an access token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, api_token: &ApiToken) -> Result<AccessToken, HttpError>;
}

/// Hands out the current access token and refreshes it on demand.
///
/// Reads go through an `RwLock`; exchanges are serialized by a separate
/// mutex so that callers hitting a 401 at the same time share one refresh.
pub struct TokenProvider {
    api_token: Option<ApiToken>,
    exchange: Box<dyn TokenExchange>,
    current: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
}

impl TokenProvider {
    pub fn new(api_token: Option<ApiToken>, exchange: impl TokenExchange + 'static) -> Self {
        Self {
            api_token,
            exchange: Box::new(exchange),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the cached access token, performing the handshake on first use.
    #[tracing::instrument(skip(self))]
    pub async fn get_token(&self) -> Result<AccessToken, HttpError> {
        let api_token = self.api_token()?;

        if let Some(token) = self.current.read().await.clone() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Someone else may have finished the handshake while we waited.
        if let Some(token) = self.current.read().await.clone() {
            return Ok(token);
        }

        debug!("No cached access token, exchanging API token");
        self.exchange_and_store(api_token).await
    }

    /// Performs the handshake unconditionally and replaces the cached token.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_token(&self) -> Result<AccessToken, HttpError> {
        let api_token = self.api_token()?;
        let _guard = self.refresh_lock.lock().await;
        self.exchange_and_store(api_token).await
    }

    /// Refreshes after `stale` was rejected by the upstream.
    ///
    /// When another caller already replaced `stale`, the newer cached token is
    /// returned and no handshake is made.
    #[tracing::instrument(skip(self, stale))]
    pub async fn refresh_after_rejection(
        &self,
        stale: &AccessToken,
    ) -> Result<AccessToken, HttpError> {
        let api_token = self.api_token()?;
        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.current.read().await.as_ref() {
            if token != stale {
                debug!("Access token was already refreshed by a concurrent request");
                return Ok(token.clone());
            }
        }

        self.exchange_and_store(api_token).await
    }

    /// Drops the cached access token; the next `get_token` performs a handshake.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    fn api_token(&self) -> Result<&ApiToken, HttpError> {
        self.api_token.as_ref().ok_or_else(|| {
            HttpError::Auth(
                "no API token supplied (pass --esp-api-token or set ESP_API_TOKEN)".to_string(),
            )
        })
    }

    /// Must be called with `refresh_lock` held.
    async fn exchange_and_store(&self, api_token: &ApiToken) -> Result<AccessToken, HttpError> {
        let token = self.exchange.exchange(api_token).await?;
        *self.current.write().await = Some(token.clone());
        info!("The access token is refreshed: {}", token.masked());
        Ok(token)
    }
}
