//! Retry policy and failure classification for Helix requests.

use std::time::Duration;

use reqwest::StatusCode;

/// Total number of attempts (first try included) for a single call.
pub const MAX_ATTEMPTS: usize = 4;

/// Lower bound of the exponential backoff between attempts.
pub const RETRY_WAIT_MIN: Duration = Duration::from_secs(1);

/// Upper bound of the exponential backoff between attempts.
pub const RETRY_WAIT_MAX: Duration = Duration::from_secs(10);

/// How many attempts a call gets and how long to wait between them.
///
/// The delay before attempt `n + 1` is `wait_min * 2^(n - 1)`, clamped to
/// `[wait_min, wait_max]`. Connection failures and 5xx responses share the
/// same schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub wait_min: Duration,
    pub wait_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            wait_min: RETRY_WAIT_MIN,
            wait_max: RETRY_WAIT_MAX,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            wait_min: Duration::ZERO,
            wait_max: Duration::ZERO,
        }
    }

    /// Delay to sleep after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as u32;
        let delay = self.wait_min.saturating_mul(2u32.saturating_pow(exp));
        delay.clamp(self.wait_min, self.wait_max.max(self.wait_min))
    }

    /// Whether another attempt is allowed after `attempt` attempts were made.
    pub fn has_attempts_left(&self, attempt: usize) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// Every way a Helix call can fail.
#[derive(Debug)]
pub enum HttpError {
    /// Credentials could not be obtained or refreshed.
    Auth(String),
    /// The upstream could not be reached (DNS, TCP, TLS, timeout).
    ConnectionFailure(String),
    /// The upstream answered with a 5xx status.
    ServerError { status: StatusCode, body: String },
    /// The upstream rejected the bearer token (HTTP 401).
    AuthExpired { body: String },
    /// Any other 4xx status. Never retried.
    ClientError { status: StatusCode, body: String },
    /// The attempt bound was reached; `last` is the final failure seen.
    RetriesExhausted { attempts: usize, last: Box<HttpError> },
    /// The request path could not be turned into a URL under the base URL.
    InvalidUrl(String),
    /// A successful response body did not have the expected shape.
    Decode(String),
    /// The client itself is misconfigured (TLS setup, header values).
    Config(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            HttpError::ConnectionFailure(msg) => write!(f, "Connection failed: {}", msg),
            HttpError::ServerError { status, body } => {
                write!(f, "Server error: HTTP {}", status.as_u16())?;
                write_body(f, body)
            }
            HttpError::AuthExpired { body } => {
                write!(f, "Access token rejected: HTTP 401")?;
                write_body(f, body)
            }
            HttpError::ClientError { status, body } => {
                write!(f, "Request error: HTTP {}", status.as_u16())?;
                write_body(f, body)
            }
            HttpError::RetriesExhausted { attempts, last } => {
                write!(f, "Giving up after {} attempts: {}", attempts, last)
            }
            HttpError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            HttpError::Decode(msg) => write!(f, "Unexpected response body: {}", msg),
            HttpError::Config(msg) => write!(f, "Invalid client configuration: {}", msg),
        }
    }
}

fn write_body(f: &mut std::fmt::Formatter<'_>, body: &str) -> std::fmt::Result {
    const MAX_BODY: usize = 512;
    let body = body.trim();
    if body.is_empty() {
        return Ok(());
    }
    match body.char_indices().nth(MAX_BODY) {
        Some((idx, _)) => write!(f, " ({}...)", &body[..idx]),
        None => write!(f, " ({})", body),
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HttpError::RetriesExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl HttpError {
    /// Whether the retry loop may try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::ConnectionFailure(_)
                | HttpError::ServerError { .. }
                | HttpError::AuthExpired { .. }
        )
    }

    /// The HTTP status behind this failure, if the upstream answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::ServerError { status, .. } | HttpError::ClientError { status, .. } => {
                Some(*status)
            }
            HttpError::AuthExpired { .. } => Some(StatusCode::UNAUTHORIZED),
            HttpError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Classifies a response status.
/// Returns `None` for statuses that count as success, or the failure otherwise.
pub fn classify_status(status: StatusCode, body: String) -> Option<HttpError> {
    match status {
        StatusCode::UNAUTHORIZED => Some(HttpError::AuthExpired { body }),
        // 429 included: rate limits are surfaced, not retried
        s if s.is_client_error() => Some(HttpError::ClientError { status: s, body }),
        s if s.is_server_error() => Some(HttpError::ServerError { status: s, body }),
        _ => None,
    }
}

/// Classifies an error raised by the transport before any status was received.
pub fn classify_transport(error: reqwest::Error) -> HttpError {
    if error.is_builder() {
        return HttpError::InvalidUrl(error.to_string());
    }
    if error.is_decode() {
        return HttpError::Decode(error.to_string());
    }
    // connect, timeout, request and body errors all mean the exchange never completed
    HttpError::ConnectionFailure(error.to_string())
}
