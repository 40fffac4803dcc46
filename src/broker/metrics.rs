//! Prometheus counters for token acquisition.
//!
//! Each broker owns its own `Registry` so that several brokers (tests, CLI)
//! can coexist in one process. `/metrics` renders it via `encode()`.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub struct BrokerMetrics {
    registry: Registry,
    acquisitions_total: IntCounterVec,
    attempts_total: IntCounterVec,
    cache_lookups_total: IntCounterVec,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let acquisitions_total = IntCounterVec::new(
            Opts::new(
                "broker_acquisitions_total",
                "Token acquisitions by strategy and outcome",
            ),
            &["strategy", "outcome"],
        )
        .expect("failed to create broker_acquisitions_total");
        registry
            .register(Box::new(acquisitions_total.clone()))
            .expect("failed to register broker_acquisitions_total");

        let attempts_total = IntCounterVec::new(
            Opts::new(
                "broker_attempts_total",
                "Individual token endpoint calls by result",
            ),
            &["endpoint", "result"],
        )
        .expect("failed to create broker_attempts_total");
        registry
            .register(Box::new(attempts_total.clone()))
            .expect("failed to register broker_attempts_total");

        let cache_lookups_total = IntCounterVec::new(
            Opts::new("broker_cache_lookups_total", "Token cache lookups by result"),
            &["scope_kind", "result"],
        )
        .expect("failed to create broker_cache_lookups_total");
        registry
            .register(Box::new(cache_lookups_total.clone()))
            .expect("failed to register broker_cache_lookups_total");

        Self {
            registry,
            acquisitions_total,
            attempts_total,
            cache_lookups_total,
        }
    }

    pub fn record_acquisition(&self, strategy: &str, outcome: &str) {
        self.acquisitions_total
            .with_label_values(&[strategy, outcome])
            .inc();
    }

    pub fn record_attempt(&self, endpoint: &str, result: &str) {
        self.attempts_total.with_label_values(&[endpoint, result]).inc();
    }

    pub fn record_cache_lookup(&self, scope_kind: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .with_label_values(&[scope_kind, result])
            .inc();
    }

    pub fn attempts(&self, endpoint: &str, result: &str) -> u64 {
        self.attempts_total.with_label_values(&[endpoint, result]).get()
    }

    pub fn acquisitions(&self, strategy: &str, outcome: &str) -> u64 {
        self.acquisitions_total
            .with_label_values(&[strategy, outcome])
            .get()
    }

    /// Render all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("failed to encode broker metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
