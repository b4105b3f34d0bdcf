//! Upstream REST client.
//!
//! Every tool call resolves to exactly one `GET` against the configured base
//! URL. The response body is read as text and parsed as JSON; bodies that are
//! not JSON are wrapped as `{"raw": "<text>"}` so the caller decides whether
//! that is fatal.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

/// Default bound on a single upstream request.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of one upstream call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Upstream answered with a non-2xx status.
    #[error("HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Parsed JSON body, or `{"raw": text}`.
        body: Value,
    },

    /// The request exceeded the configured timeout.
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, TLS or body read failure.
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The base URL cannot carry path segments.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    /// Structured detail attached to tool failures.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Status { body, .. } => Some(body.clone()),
            _ => None,
        }
    }
}

/// Source of upstream JSON documents.
#[async_trait]
pub trait Upstream: Send + Sync + std::fmt::Debug {
    /// `GET {base}/{segments...}`; each segment is percent-encoded on its own.
    async fn fetch_json(&self, segments: &[&str]) -> Result<Value, UpstreamError>;
}

/// [`Upstream`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpUpstream {
    /// Create a client for `base_url` with the given request timeout.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, UpstreamError> {
        if base_url.cannot_be_a_base() {
            return Err(UpstreamError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::Transport)?;
        Ok(Self {
            base_url,
            http,
            timeout,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the target URL; `/`, `?`, `#` and `%` inside a segment are escaped.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| UpstreamError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn map_reqwest(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(err)
        }
    }
}

/// Parse `text` as JSON, falling back to `{"raw": text}`.
pub fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch_json(&self, segments: &[&str]) -> Result<Value, UpstreamError> {
        let url = self.endpoint(segments)?;
        tracing::debug!(name: "upstream.request", url = %url, "GET upstream");

        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let status = res.status();
        let text = res.text().await.map_err(|e| self.map_reqwest(e))?;
        let body = parse_body(&text);

        if !status.is_success() {
            tracing::warn!(
                name: "upstream.status",
                status = status.as_u16(),
                "upstream returned non-success status"
            );
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
