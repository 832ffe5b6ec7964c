//! Shared JSON-over-HTTP plumbing for the hosting API clients.
//!
//! Both the upstream (GitHub) and downstream (Gitee) clients go through
//! [`JsonApi`], which applies a [`RetryPolicy`] to connection-level failures
//! and treats any other non-2xx response as a hard failure logged with its
//! body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::retry::{RetryError, RetryPolicy};

const USER_AGENT: &str = concat!("patch-tracker/", env!("CARGO_PKG_VERSION"));

/// Bound on establishing a TCP/TLS connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on one whole request, body included. A stalled attempt surfaces as
/// a connection failure and goes through the retry policy.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Failure talking to a hosting API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("request error: {0}")]
    Request(String),

    #[error("invalid repository identifier: {0}")]
    InvalidRepo(String),
}

impl ApiError {
    /// True for connection-level failures (refused, reset, timed out).
    /// Every HTTP status, including 5xx, is a hard failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Connection { .. })
    }

    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ApiError::Connection {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ApiError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            ApiError::Request(err.to_string())
        }
    }
}

/// A hosting service whose access token can be checked up front.
#[async_trait]
pub trait CredentialCheck: Send + Sync {
    /// Short service name used in logs (`github`, `gitee`).
    fn service(&self) -> &str;

    /// Verify the configured token is accepted by the service.
    async fn verify_credentials(&self) -> Result<(), ApiError>;
}

/// Thin wrapper over a `reqwest::Client` bound to one API base URL.
#[derive(Clone)]
pub struct JsonApi {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl JsonApi {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self, ApiError> {
        Self::with_timeouts(base_url, retry, CONNECT_TIMEOUT, REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: &str,
        retry: RetryPolicy,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request built by `build` and return the response body as text.
    ///
    /// `build` is invoked once per attempt. Returns `Ok(None)` for a 404 when
    /// `allow_missing` is set.
    pub async fn send_text<F>(
        &self,
        method: Method,
        path: &str,
        allow_missing: bool,
        build: F,
    ) -> Result<Option<String>, ApiError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        match self.send_bytes(method, path, allow_missing, build).await? {
            Some(body) => String::from_utf8(body)
                .map(Some)
                .map_err(|e| ApiError::Decode {
                    url,
                    message: format!("response is not UTF-8: {e}"),
                }),
            None => Ok(None),
        }
    }

    /// Like [`send_text`](Self::send_text) but leaves the body undecoded.
    pub async fn send_bytes<F>(
        &self,
        method: Method,
        path: &str,
        allow_missing: bool,
        build: F,
    ) -> Result<Option<Vec<u8>>, ApiError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        let label = format!("{method} {path}");
        self.retry
            .run(
                &label,
                |attempt| {
                    let request = build(self.client.request(method.clone(), &url));
                    let url = url.clone();
                    let method = method.clone();
                    async move {
                        debug!(method = %method, url = %url, attempt, "api request");
                        let response = request
                            .send()
                            .await
                            .map_err(|e| ApiError::from_reqwest(&url, e))?;
                        let status = response.status();
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| ApiError::from_reqwest(&url, e))?
                            .to_vec();
                        if status == StatusCode::NOT_FOUND && allow_missing {
                            return Ok(None);
                        }
                        if !status.is_success() {
                            let body = String::from_utf8_lossy(&body).into_owned();
                            error!(
                                method = %method,
                                url = %url,
                                status = status.as_u16(),
                                body = %body,
                                "api request failed"
                            );
                            return Err(ApiError::Status {
                                method: method.to_string(),
                                url,
                                status: status.as_u16(),
                                body,
                            });
                        }
                        Ok(Some(body))
                    }
                },
                ApiError::is_transient,
            )
            .await
            .map_err(RetryError::into_inner)
    }

    /// Like [`send_text`](Self::send_text) but decodes the body as JSON.
    pub async fn send_json<T, F>(
        &self,
        method: Method,
        path: &str,
        allow_missing: bool,
        build: F,
    ) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        match self.send_text(method, path, allow_missing, build).await? {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| ApiError::Decode {
                    url,
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// `send_json` for endpoints where 404 is an error.
    pub async fn require_json<T, F>(&self, method: Method, path: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        self.send_json(method, path, false, build)
            .await?
            .ok_or_else(|| ApiError::Decode {
                url,
                message: "empty response".to_string(),
            })
    }
}
