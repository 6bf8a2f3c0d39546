//! HTTP client with bearer-token attachment and built-in retry logic.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::retry::{HttpError, RetryPolicy, classify_status, classify_transport};
use super::url::join_url_segments;
use crate::auth::{AccessToken, TokenProvider};
use crate::config::ClientConfig;

/// Header carrying the CSRF token once [`HttpClient::set_csrf`] is called.
pub const CSRF_TOKEN_HEADER: &str = "x-csrf-token";

/// Per-call extras: query string, body, headers and a timeout override.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    query: Vec<(String, String)>,
    json: Option<Value>,
    form: Option<Vec<(String, String)>>,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl RequestOptions {
    /// Creates empty options: no query, no body, no extra headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a query parameter. Repeated keys are sent repeatedly.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sends `body` as JSON. Replaces any form body.
    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self.form = None;
        self
    }

    /// Sends `fields` url-encoded. Replaces any JSON body.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.form = Some(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.json = None;
        self
    }

    /// Adds headers for this call only; they win over client-wide defaults.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Overrides the client-wide request timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response that made it through classification: status below 400.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Deserializes the body; an empty body reads as JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let body: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
        serde_json::from_slice(body).map_err(|e| HttpError::Decode(e.to_string()))
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// State of one verb call; dropped once the call resolves.
struct RequestContext {
    method: Method,
    url: Url,
    options: RequestOptions,
}

/// Helix HTTP client: resolves paths under a base URL, attaches the current
/// bearer token and retries transient failures.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    tokens: Arc<TokenProvider>,
    retry: RetryPolicy,
    default_headers: HeaderMap,
}

impl HttpClient {
    /// Builds the underlying reqwest client from `config`.
    pub fn new(config: &ClientConfig, tokens: Arc<TokenProvider>) -> Result<Self, HttpError> {
        let client = config.build_client()?;
        Self::with_client(client, &config.base_url, tokens, config.retry)
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(
        client: Client,
        base_url: &str,
        tokens: Arc<TokenProvider>,
        retry: RetryPolicy,
    ) -> Result<Self, HttpError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            client,
            base_url,
            tokens,
            retry,
            default_headers: HeaderMap::new(),
        })
    }

    /// Adds headers sent with every later request of this client.
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers.extend(headers);
        self
    }

    /// Sends `X-CSRF-TOKEN: <csrf_token>` with every later request.
    pub fn set_csrf(&mut self, csrf_token: &str) -> Result<(), HttpError> {
        let value = HeaderValue::from_str(csrf_token)
            .map_err(|e| HttpError::Config(format!("invalid CSRF token: {}", e)))?;
        self.default_headers.insert(CSRF_TOKEN_HEADER, value);
        Ok(())
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn tokens(&self) -> &Arc<TokenProvider> {
        &self.tokens
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Turns a path into a full URL under the base URL.
    ///
    /// Absolute URLs handed back by the upstream (task URLs, `next` links) are
    /// accepted when they share the base URL's origin; the bearer token is
    /// never sent anywhere else.
    pub fn resolve(&self, path: &str) -> Result<Url, HttpError> {
        if let Ok(url) = Url::parse(path) {
            if url.origin() != self.base_url.origin() {
                return Err(HttpError::InvalidUrl(format!(
                    "{} is outside of {}",
                    url, self.base_url
                )));
            }
            return Ok(url);
        }

        let joined = join_url_segments(&[self.base_url.as_str(), path])?;
        Url::parse(&joined).map_err(|e| HttpError::InvalidUrl(format!("{}: {}", joined, e)))
    }

    /// Performs a GET request.
    /// Automatically retries on transient errors.
    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, HttpError> {
        self.request(Method::GET, path, options).await
    }

    /// Performs a POST request.
    /// Automatically retries on transient errors.
    pub async fn post(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, HttpError> {
        self.request(Method::POST, path, options).await
    }

    /// Performs a PUT request.
    /// Automatically retries on transient errors.
    pub async fn put(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, HttpError> {
        self.request(Method::PUT, path, options).await
    }

    /// Performs a PATCH request.
    /// Automatically retries on transient errors.
    pub async fn patch(&self, path: &str, options: RequestOptions) -> Result<ApiResponse, HttpError> {
        self.request(Method::PATCH, path, options).await
    }

    /// Performs a DELETE request.
    /// Automatically retries on transient errors.
    pub async fn delete(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, HttpError> {
        self.request(Method::DELETE, path, options).await
    }

    /// Performs a GET request and deserializes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.get(path, options).await?.json()
    }

    /// Performs a POST request and deserializes the JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.post(path, options).await?.json()
    }

    /// Performs a PUT request and deserializes the JSON response.
    pub async fn put_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.put(path, options).await?.json()
    }

    /// Performs a PATCH request and deserializes the JSON response.
    pub async fn patch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.patch(path, options).await?.json()
    }

    /// Performs a DELETE request and deserializes the JSON response.
    pub async fn delete_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.delete(path, options).await?.json()
    }

    /// Follows `next` links and collects the `item_key` array of every page.
    ///
    /// Stops at the first page with no items or no `next` link. `options` are
    /// applied to the first page only; `next` links carry their own query.
    #[tracing::instrument(skip(self, options))]
    pub async fn get_paged(
        &self,
        path: &str,
        options: RequestOptions,
        item_key: &str,
    ) -> Result<Vec<Value>, HttpError> {
        let mut items = Vec::new();
        let mut next = Some(path.to_string());
        let mut options = Some(options);

        while let Some(page_url) = next.take() {
            let page: Value = self
                .get_json(&page_url, options.take().unwrap_or_default())
                .await?;

            let page_items = page
                .get(item_key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if page_items.is_empty() {
                break;
            }
            debug!("Fetched {} item(s) from {}", page_items.len(), page_url);
            items.extend(page_items);

            next = page
                .get("next")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }

        Ok(items)
    }

    /// Issues one verb call under the retry policy.
    #[tracing::instrument(skip(self, options))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, HttpError> {
        let ctx = RequestContext {
            url: self.resolve(path)?,
            method,
            options,
        };
        let operation_name = format!("{} {}", ctx.method, ctx.url);

        execute_with_retry(&self.retry, &self.tokens, &operation_name, |token, _attempt| {
            self.send_once(&ctx, token)
        })
        .await
    }

    /// Single attempt without retry.
    async fn send_once(
        &self,
        ctx: &RequestContext,
        token: AccessToken,
    ) -> Result<ApiResponse, HttpError> {
        let options = &ctx.options;
        let mut builder = self.client.request(ctx.method.clone(), ctx.url.clone());

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if !self.default_headers.is_empty() {
            builder = builder.headers(self.default_headers.clone());
        }
        if !options.headers.is_empty() {
            builder = builder.headers(options.headers.clone());
        }
        if let Some(json) = &options.json {
            builder = builder.json(json);
        }
        if let Some(form) = &options.form {
            builder = builder.form(form);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        builder = builder.bearer_auth(token.secret());

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify_transport)?.to_vec();

        info!("{} {} {}", ctx.method, ctx.url, status.as_u16());

        if let Some(err) = classify_status(status, String::from_utf8_lossy(&body).into_owned()) {
            return Err(err);
        }

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Runs `attempt` until it succeeds, fails terminally or the policy runs out.
///
/// Each attempt receives the current access token. A 401 refreshes the token
/// before the next attempt; refresh failures surface as `Auth` errors.
pub(crate) async fn execute_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    tokens: &TokenProvider,
    operation_name: &str,
    mut attempt_fn: F,
) -> Result<T, HttpError>
where
    F: FnMut(AccessToken, usize) -> Fut,
    Fut: Future<Output = Result<T, HttpError>>,
{
    let mut attempt = 1;

    loop {
        let token = tokens.get_token().await?;

        let err = match attempt_fn(token.clone(), attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !err.is_retryable() {
            debug!("{}: non-retryable error: {}", operation_name, err);
            return Err(err);
        }

        if !policy.has_attempts_left(attempt) {
            warn!(
                "{}: giving up after {} attempt(s): {}",
                operation_name, attempt, err
            );
            return Err(HttpError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        if matches!(err, HttpError::AuthExpired { .. }) {
            tokens.refresh_after_rejection(&token).await?;
        }

        let delay = policy.delay_after(attempt);
        warn!(
            "{}: attempt {}/{} failed ({}), retrying in {}ms...",
            operation_name,
            attempt,
            policy.max_attempts,
            err,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
