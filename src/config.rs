//! Client configuration and the table of known Helix servers.
//!
//! Nothing here reads the process environment; the CLI resolves
//! `ESP_API_TOKEN` and passes everything in explicitly.

use std::time::Duration;

use log::debug;
use reqwest::Client;

use crate::http::{HttpError, RetryPolicy, join_url_segments};

/// CSP production token endpoint (client-credentials flow).
pub const CSP_TOKEN_URL: &str = "https://console.cloud.vmware.com/csp/gateway/am/api/auth/token";

/// CSP staging token endpoint (client-credentials flow).
pub const CSP_STG_TOKEN_URL: &str =
    "https://console-stg.cloud.vmware.com/csp/gateway/am/api/auth/token";

pub const ARTICAT_SERVICE: &str = "articat";
pub const ARTICAT_API_VERSION: &str = "api/v1";
pub const DEFAULT_SERVER: &str = "beta";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A named Helix deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerProfile {
    pub alias: &'static str,
    pub hostname: &'static str,
    pub ssl_verify: bool,
    /// Behind the Helix Envoy the service name is part of the path.
    pub is_within_envoy: bool,
    pub csp_token_url: &'static str,
}

pub const SERVERS: &[ServerProfile] = &[
    ServerProfile {
        alias: "local",
        hostname: "http://shirvc:8000",
        ssl_verify: false,
        is_within_envoy: false,
        csp_token_url: CSP_STG_TOKEN_URL,
    },
    ServerProfile {
        alias: "dev",
        hostname: "https://helix-dev.ara.decc.vmware.com",
        ssl_verify: true,
        is_within_envoy: true,
        csp_token_url: CSP_STG_TOKEN_URL,
    },
    ServerProfile {
        alias: "ara_dev",
        hostname: "https://articat.ara.decc.vmware.com",
        ssl_verify: true,
        is_within_envoy: false,
        csp_token_url: CSP_STG_TOKEN_URL,
    },
    ServerProfile {
        alias: "beta",
        hostname: "https://helix-beta.vela.decc.vmware.com",
        ssl_verify: true,
        is_within_envoy: true,
        csp_token_url: CSP_STG_TOKEN_URL,
    },
    ServerProfile {
        alias: "vela_beta",
        hostname: "https://articat.vela.decc.vmware.com",
        ssl_verify: true,
        is_within_envoy: false,
        csp_token_url: CSP_STG_TOKEN_URL,
    },
    ServerProfile {
        alias: "esp_beta",
        hostname: "https://helix-beta.vela.decc.vmware.com",
        ssl_verify: true,
        is_within_envoy: true,
        csp_token_url: CSP_TOKEN_URL,
    },
    ServerProfile {
        alias: "pavo_beta",
        hostname: "https://articat.pavo.decc.vmware.com",
        ssl_verify: true,
        is_within_envoy: false,
        csp_token_url: CSP_STG_TOKEN_URL,
    },
];

/// Comma-separated aliases, for help text.
pub fn server_aliases() -> String {
    let mut aliases: Vec<_> = SERVERS.iter().map(|s| s.alias).collect();
    aliases.sort_unstable();
    aliases.join(", ")
}

/// Where requests go once an alias or URL has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub hostname: String,
    pub ssl_verify: bool,
    pub is_within_envoy: bool,
    pub csp_token_url: String,
}

impl ServerTarget {
    /// Resolves a known alias, or treats the input as the hostname of a
    /// custom instance.
    ///
    /// Custom instances skip TLS verification and take the envoy flag from
    /// the caller; `csp_prod` picks their CSP token endpoint.
    pub fn resolve(server: &str, is_within_envoy: bool, csp_prod: bool) -> Self {
        if let Some(profile) = SERVERS.iter().find(|p| p.alias == server) {
            debug!("Using server profile {:?}", profile);
            return Self {
                hostname: profile.hostname.to_string(),
                ssl_verify: profile.ssl_verify,
                is_within_envoy: profile.is_within_envoy,
                csp_token_url: profile.csp_token_url.to_string(),
            };
        }

        debug!("Unknown server alias, using {} as hostname", server);
        let csp_token_url = if csp_prod {
            CSP_TOKEN_URL
        } else {
            CSP_STG_TOKEN_URL
        };
        Self {
            hostname: server.to_string(),
            ssl_verify: false,
            is_within_envoy,
            csp_token_url: csp_token_url.to_string(),
        }
    }

    /// `hostname[/service]/api_version`; the service segment only applies
    /// within the envoy.
    pub fn root_url(&self, service: &str, api_version: &str) -> Result<String, HttpError> {
        let service = if self.is_within_envoy { service } else { "" };
        join_url_segments(&[&self.hostname, service, api_version])
    }
}

/// Settings for building an [`HttpClient`](crate::http::HttpClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub ssl_verify: bool,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ssl_verify: true,
            retry: RetryPolicy::default(),
            user_agent: format!("articat-cli/{}", env!("ARTICAT_VERSION")),
        }
    }

    /// Config for the Articat service on `target`.
    pub fn for_articat(target: &ServerTarget) -> Result<Self, HttpError> {
        let base_url = target.root_url(ARTICAT_SERVICE, ARTICAT_API_VERSION)?;
        let mut config = Self::new(base_url);
        config.ssl_verify = target.ssl_verify;
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The reqwest client shared by the token exchange and business calls.
    pub fn build_client(&self) -> Result<Client, HttpError> {
        Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(!self.ssl_verify)
            .build()
            .map_err(|e| HttpError::Config(format!("cannot build HTTP client: {}", e)))
    }
}
