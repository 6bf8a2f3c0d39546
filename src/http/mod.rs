//! HTTP client module with token attachment, retry logic and error handling.

mod client;
mod retry;
mod url;

pub use client::{ApiResponse, CSRF_TOKEN_HEADER, HttpClient, RequestOptions};
pub use retry::{
    HttpError, MAX_ATTEMPTS, RETRY_WAIT_MAX, RETRY_WAIT_MIN, RetryPolicy, classify_status,
    classify_transport,
};
pub use url::join_url_segments;
