//! Background job: sweep expired tokens out of the broker cache.
//!
//! Reads already evict lazily. This bounds memory for accounts that are
//! looked up once and never again.

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::api::AppState;

/// Spawn the background cleanup task. Call this once at startup.
pub fn spawn(state: Arc<AppState>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            let evicted = state.broker.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "evicted expired broker tokens");
            }
        }
    });
}
