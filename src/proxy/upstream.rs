//! Client for the clinical I/O API behind `/api/common/*`.
//!
//! Transient failures (connect errors, 5xx, 429) are retried by
//! reqwest-retry. A 401 is not transient and comes back untouched so the
//! caller can invalidate the token it injected.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

use crate::errors::AppError;

/// A fully read I/O API response.
#[derive(Debug)]
pub struct IoResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

pub struct IoApiClient {
    client: ClientWithMiddleware,
    base_url: Option<String>,
}

impl IoApiClient {
    pub fn new(base_url: Option<String>, allow_insecure_tls: bool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(allow_insecure_tls)
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client, base_url })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// `{base}/api/common/{path}[?query]`
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Result<String, AppError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::NotConfigured("IO_API_BASE not configured".into()))?;
        let url = format!(
            "{}/api/common/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(match query {
            Some(q) if !q.is_empty() => format!("{}?{}", url, q),
            _ => url,
        })
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<IoResponse, AppError> {
        let resp = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url, "I/O API request failed after retries: {}", e);
                AppError::Upstream(e.to_string())
            })?;

        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let body = resp
            .bytes()
            .await
            .map_err(|e| AppError::Upstream(format!("reading I/O API response: {}", e)))?;

        Ok(IoResponse {
            status,
            content_type,
            body,
        })
    }
}
