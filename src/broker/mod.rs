//! Credential broker: obtains, caches and refreshes bearer tokens for the
//! upstream clinical API.
//!
//! Two scopes are served:
//! - the default scope, filled by the login strategy (username/password);
//! - per-account scopes, filled by the account lookup strategy (self endpoint
//!   first, then the upstream directly).
//!
//! Concurrent misses on the same scope are not deduplicated. Each caller
//! acquires on its own and the last successful write wins, including a slow
//! acquisition that finishes after a newer one. Failures are never cached.

pub mod cache;
pub mod extract;
pub mod metrics;
pub mod retry;
pub mod strategy;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::config::BrokerConfig;
use crate::errors::{BrokerError, EndpointFailure};
use cache::{ScopeKey, TokenCache, TokenRecord};
use extract::ExtractedToken;
use metrics::BrokerMetrics;
use retry::{fetch_with_retry, AttemptError};
use strategy::Strategy;

/// Snapshot for `/api/token/status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatus {
    pub default_token_present: bool,
    pub default_fetched_at: Option<DateTime<Utc>>,
    pub account_tokens_cached: usize,
}

pub struct CredentialBroker {
    client: reqwest::Client,
    cache: TokenCache,
    config: BrokerConfig,
    metrics: BrokerMetrics,
}

impl CredentialBroker {
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(config.allow_insecure_tls)
            .build()
            .map_err(|e| BrokerError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        if config.allow_insecure_tls {
            tracing::warn!("token broker: TLS certificate verification is DISABLED");
        }

        Ok(Self {
            client,
            cache: TokenCache::new(),
            config,
            metrics: BrokerMetrics::new(),
        })
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Cached login token, or a fresh one via the login strategy.
    pub async fn default_token(&self) -> Result<String, BrokerError> {
        if let Some(record) = self.cached(&ScopeKey::Default) {
            return Ok(record.value);
        }
        self.refresh_default().await
    }

    /// Log in again regardless of the cache, then overwrite it.
    pub async fn refresh_default(&self) -> Result<String, BrokerError> {
        let strategy = strategy::login(&self.config)?;
        self.acquire(ScopeKey::Default, &strategy).await
    }

    /// Cached token for `account_id`, or a fresh one via account lookup.
    /// The id is trimmed; an empty id fails before any network call.
    pub async fn token_for_account(&self, account_id: &str) -> Result<String, BrokerError> {
        let id = normalize_account_id(account_id)?;
        if let Some(record) = self.cached(&ScopeKey::Account(id.clone())) {
            return Ok(record.value);
        }
        self.acquire_account(id).await
    }

    /// Account lookup regardless of the cache, then overwrite it.
    pub async fn refresh_account(&self, account_id: &str) -> Result<String, BrokerError> {
        let id = normalize_account_id(account_id)?;
        self.acquire_account(id).await
    }

    /// One call to the upstream token endpoint, bypassing the cache and the
    /// self endpoint. Keeps the upstream TTL hint. A non-2xx surfaces as
    /// `UpstreamRejected`.
    pub async fn fetch_direct(&self, account_id: &str) -> Result<ExtractedToken, BrokerError> {
        let id = normalize_account_id(account_id)?;
        let strategy = strategy::direct(&self.config, &id)?;
        let endpoint = &strategy.endpoints[0];

        match fetch_with_retry(&self.client, endpoint, &strategy.retry, &self.metrics).await {
            Ok(token) => {
                self.metrics.record_acquisition(strategy.name, "success");
                Ok(token)
            }
            Err(exhausted) => {
                self.metrics.record_acquisition(strategy.name, "failure");
                match exhausted.error {
                    AttemptError::Status { status, body, .. } => {
                        Err(BrokerError::UpstreamRejected { status, body })
                    }
                    error => Err(BrokerError::Acquisition {
                        scope: ScopeKey::Account(id),
                        failures: vec![EndpointFailure {
                            endpoint: exhausted.endpoint,
                            attempts: exhausted.attempts,
                            message: error.to_string(),
                        }],
                        last: error,
                    }),
                }
            }
        }
    }

    /// Drop the cached token for `scope`. Call after a 401 from a request made
    /// with a token from this broker. Returns whether a record was removed.
    pub fn invalidate(&self, scope: &ScopeKey) -> bool {
        let removed = self.cache.remove(scope).is_some();
        if removed {
            tracing::info!(scope = %scope, "token invalidated");
        }
        removed
    }

    pub fn status(&self) -> BrokerStatus {
        let default = self
            .cache
            .peek(&ScopeKey::Default)
            .filter(|record| record.is_live_at(Utc::now()));
        BrokerStatus {
            default_token_present: default.is_some(),
            default_fetched_at: default.map(|record| record.fetched_at),
            account_tokens_cached: self.cache.live_account_count(),
        }
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.cache.evict_expired()
    }

    fn cached(&self, scope: &ScopeKey) -> Option<TokenRecord> {
        let record = self.cache.get_live(scope);
        self.metrics.record_cache_lookup(scope.kind(), record.is_some());
        record
    }

    async fn acquire_account(&self, account_id: String) -> Result<String, BrokerError> {
        let strategy = strategy::account_lookup(&self.config, &account_id)?;
        self.acquire(ScopeKey::Account(account_id), &strategy).await
    }

    /// Walk the strategy's endpoints in order, each with its own bounded retry
    /// loop. Caches and returns the first token; otherwise reports every
    /// endpoint's failure and leaves the cache untouched.
    async fn acquire(&self, scope: ScopeKey, strategy: &Strategy) -> Result<String, BrokerError> {
        let mut failures = Vec::with_capacity(strategy.endpoints.len());
        let mut last = None;

        for endpoint in &strategy.endpoints {
            match fetch_with_retry(&self.client, endpoint, &strategy.retry, &self.metrics).await {
                Ok(token) => {
                    let ttl = token.ttl.unwrap_or(self.config.default_ttl);
                    let record = TokenRecord::new(scope.clone(), token.value, ttl);
                    let value = record.value.clone();
                    tracing::info!(
                        scope = %scope,
                        strategy = strategy.name,
                        endpoint = endpoint.name,
                        expires_at = %record.expires_at,
                        "token acquired"
                    );
                    self.cache.put(record);
                    self.metrics.record_acquisition(strategy.name, "success");
                    return Ok(value);
                }
                Err(exhausted) => {
                    tracing::warn!(
                        scope = %scope,
                        strategy = strategy.name,
                        endpoint = exhausted.endpoint,
                        attempts = exhausted.attempts,
                        "token endpoint gave up: {}",
                        exhausted.error
                    );
                    failures.push(EndpointFailure {
                        endpoint: exhausted.endpoint,
                        attempts: exhausted.attempts,
                        message: exhausted.error.to_string(),
                    });
                    last = Some(exhausted.error);
                }
            }
        }

        self.metrics.record_acquisition(strategy.name, "failure");
        match last {
            Some(last) => Err(BrokerError::Acquisition {
                scope,
                failures,
                last,
            }),
            None => Err(BrokerError::Configuration(format!(
                "strategy '{}' has no endpoints",
                strategy.name
            ))),
        }
    }
}

fn normalize_account_id(account_id: &str) -> Result<String, BrokerError> {
    let id = account_id.trim();
    if id.is_empty() {
        return Err(BrokerError::InvalidArgument("accountId is required".into()));
    }
    Ok(id.to_string())
}
