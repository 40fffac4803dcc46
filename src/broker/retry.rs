use rand::Rng;
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::extract::{extract_token, ExtractedToken};
use super::metrics::BrokerMetrics;
use super::strategy::{Endpoint, EndpointRequest};

/// Longest slice of an error body kept for logs and error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Bounded retry with capped exponential backoff, applied per endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per endpoint, including the first. Never below 1.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Random extra delay in `0..=jitter_ms`. Zero keeps the schedule monotonic.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 8_000,
            jitter_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no waiting.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        // Exponential: base * 2^(attempt - 1), capped
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self.base_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(raw.min(self.max_backoff_ms))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    /// The waits between attempts when every attempt fails, jitter excluded.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1)).map(|a| self.base_delay(a)).collect()
    }
}

/// Why a single call to a token endpoint failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("{url} returned an empty or unrecognised token body")]
    EmptyToken { url: String },
}

impl AttemptError {
    /// Transport errors and non-2xx are transient. An empty 2xx body is a
    /// contract problem and retrying the same endpoint won't fix it.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::EmptyToken { .. })
    }

    fn kind(&self) -> &'static str {
        match self {
            AttemptError::Transport { source, .. } if source.is_timeout() => "timeout",
            AttemptError::Transport { .. } => "transport",
            AttemptError::Status { .. } => "status",
            AttemptError::EmptyToken { .. } => "empty_token",
        }
    }
}

/// An endpoint that gave up, with the attempt count and the last error.
#[derive(Debug)]
pub struct EndpointExhausted {
    pub endpoint: &'static str,
    pub attempts: u32,
    pub error: AttemptError,
}

/// Call `endpoint` until it yields a token, fails fatally, or runs out of attempts.
pub async fn fetch_with_retry(
    client: &Client,
    endpoint: &Endpoint,
    policy: &RetryPolicy,
    metrics: &BrokerMetrics,
) -> Result<ExtractedToken, EndpointExhausted> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match attempt_once(client, endpoint).await {
            Ok(token) => {
                metrics.record_attempt(endpoint.name, "success");
                debug!(endpoint = endpoint.name, attempt, "token endpoint returned a token");
                return Ok(token);
            }
            Err(error) => {
                metrics.record_attempt(endpoint.name, error.kind());

                if !error.is_retryable() {
                    warn!(
                        endpoint = endpoint.name,
                        attempt,
                        "{}; not retrying this endpoint",
                        error
                    );
                    return Err(EndpointExhausted {
                        endpoint: endpoint.name,
                        attempts: attempt,
                        error,
                    });
                }

                if attempt >= max_attempts {
                    debug!(
                        endpoint = endpoint.name,
                        "Exhausted {} attempts; last error: {}", max_attempts, error
                    );
                    return Err(EndpointExhausted {
                        endpoint: endpoint.name,
                        attempts: attempt,
                        error,
                    });
                }

                let wait = policy.delay(attempt);
                warn!(
                    endpoint = endpoint.name,
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt,
                    max_attempts,
                    error,
                    wait
                );
                sleep(wait).await;
            }
        }
    }
}

async fn attempt_once(client: &Client, endpoint: &Endpoint) -> Result<ExtractedToken, AttemptError> {
    let url = endpoint.url.to_string();
    let builder = match &endpoint.request {
        EndpointRequest::Get => client.get(endpoint.url.clone()),
        EndpointRequest::PostJson(body) => client.post(endpoint.url.clone()).json(body),
    };

    let response = builder
        .header(ACCEPT, "*/*")
        .timeout(endpoint.timeout)
        .send()
        .await
        .map_err(|source| AttemptError::Transport {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| AttemptError::Transport {
            url: url.clone(),
            source,
        })?;

    if !status.is_success() {
        return Err(AttemptError::Status {
            url,
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }

    extract_token(&body).ok_or(AttemptError::EmptyToken { url })
}
