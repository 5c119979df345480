//! HTTP access for the asset API, bandwidth probes and media downloads.
//!
//! Two shapes of request exist:
//!
//! - [`HttpClient::execute`] buffers small bodies (JSON metadata,
//!   translation text, probe payloads) and may retry.
//! - [`HttpClient::open_download`] streams a media file, optionally from a
//!   byte offset, and never retries; the download manager owns resume logic.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Ask for the bytes from `offset` to the end. Zero asks for everything.
    pub fn range_from(self, offset: u64) -> Self {
        match offset {
            0 => self,
            _ => self.header("Range", format!("bytes={}-", offset)),
        }
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// A buffered response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| BridgeError::OperationFailed(format!("Malformed JSON body: {}", e)))
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Body is not UTF-8: {}", e)))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// An open media stream. The body has not been read yet.
pub struct HttpDownload {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Bytes that `body` will yield. For a ranged response this is the
    /// remainder, not the whole file.
    pub content_length: Option<u64>,
    pub body: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
}

impl HttpDownload {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 206: the server honoured the requested range.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    /// 416: the requested offset is at or past the end of the file.
    pub fn is_range_not_satisfiable(&self) -> bool {
        self.status == 416
    }

    /// Full file size from `Content-Range: bytes a-b/total`, if the server sent one.
    pub fn resource_length(&self) -> Option<u64> {
        let range = header_value(&self.headers, "Content-Range")?;
        let (_, total) = range.rsplit_once('/')?;
        total.trim().parse().ok()
    }
}

impl std::fmt::Debug for HttpDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDownload")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Exponential backoff for buffered requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Wait after the `attempt`-th failure (1-based): base, 2x base, 4x base, up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Statuses worth another try: request timeout, throttling and server errors.
    pub fn should_retry_status(status: u16) -> bool {
        status == 408 || status == 429 || (500..600).contains(&status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request and buffer the body.
    ///
    /// Only transport failures are errors; any HTTP status is returned as a
    /// response.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Like [`execute`](Self::execute), retrying transport failures and
    /// [retryable statuses](RetryPolicy::should_retry_status).
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let _ = policy;
        self.execute(request).await
    }

    /// Start a streaming download. Rejections come back as a status, not an error.
    async fn open_download(&self, request: HttpRequest) -> Result<HttpDownload>;
}
