//! `reqwest` implementation of [`HttpClient`].

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpDownload, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared connection pool for API calls and media downloads.
///
/// The client-wide timeout only bounds connecting; buffered requests get a
/// per-request deadline and downloads run as long as bytes keep arriving.
pub struct ReqwestHttpClient {
    client: Client,
    request_timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// `timeout` applies to buffered requests that do not set their own.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .user_agent(concat!("lesson-player/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self {
            client,
            request_timeout: timeout,
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            request_timeout: Duration::from_secs(30),
        }
    }

    fn prepare(&self, request: &HttpRequest, default_timeout: Option<Duration>) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        };
        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(timeout) = request.timeout.or(default_timeout) {
            builder = builder.timeout(timeout);
        }
        builder
    }

    fn headers_of(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect()
    }

    fn transport_error(e: reqwest::Error) -> BridgeError {
        let kind = if e.is_timeout() {
            "timed out"
        } else if e.is_connect() {
            "could not connect"
        } else {
            "transport error"
        };
        BridgeError::OperationFailed(format!("{}: {}", kind, e.without_url()))
    }

    async fn send_buffered(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = self
            .prepare(request, Some(self.request_timeout))
            .send()
            .await
            .map_err(Self::transport_error)?;
        let status = response.status().as_u16();
        let headers = Self::headers_of(&response);
        let body = response.bytes().await.map_err(Self::transport_error)?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Host and path only; signed query strings stay out of the logs.
fn loggable(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send_buffered(&request).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.send_buffered(&request).await;
            let retryable = match &outcome {
                Ok(response) => RetryPolicy::should_retry_status(response.status),
                Err(_) => true,
            };
            if !retryable || attempt >= attempts {
                return outcome;
            }

            let delay = policy.delay_for(attempt);
            match &outcome {
                Ok(response) => {
                    warn!(url = loggable(&request.url), status = response.status, attempt, "Retrying request")
                }
                Err(e) => warn!(url = loggable(&request.url), error = %e, attempt, "Retrying request"),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn open_download(&self, request: HttpRequest) -> Result<HttpDownload> {
        debug!(
            url = loggable(&request.url),
            range = request.headers.get("Range").map(String::as_str),
            "Opening download"
        );

        let response = self
            .prepare(&request, None)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_of(&response);
        let content_length = response.content_length();
        let stream = response.bytes_stream().map_err(std::io::Error::other);

        Ok(HttpDownload {
            status,
            headers,
            content_length,
            body: Box::new(tokio_util::io::StreamReader::new(stream)),
        })
    }
}
