use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identity a cached token is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// The shared login token.
    Default,
    Account(String),
}

impl ScopeKey {
    pub fn kind(&self) -> &'static str {
        match self {
            ScopeKey::Default => "default",
            ScopeKey::Account(_) => "account",
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Default => f.write_str("default"),
            ScopeKey::Account(id) => write!(f, "account:{}", id),
        }
    }
}

/// One cached bearer token.
#[derive(Clone, PartialEq)]
pub struct TokenRecord {
    pub scope_key: ScopeKey,
    pub value: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Stamp a freshly acquired token with `fetched_at = now`.
    pub fn new(scope_key: ScopeKey, value: String, ttl: Duration) -> Self {
        let fetched_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| fetched_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            scope_key,
            value,
            fetched_at,
            expires_at,
        }
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// Token values stay out of logs and panic messages.
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("scope_key", &self.scope_key)
            .field("value", &"****")
            .field("fetched_at", &self.fetched_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Process-wide token map: one record per scope, replaced whole on write.
///
/// Expiry is checked on read and stale entries are evicted lazily.
/// `evict_expired()` is the periodic sweep.
#[derive(Clone, Default)]
pub struct TokenCache {
    records: Arc<DashMap<ScopeKey, TokenRecord>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the live record for `key`, dropping it if expired.
    pub fn get_live(&self, key: &ScopeKey) -> Option<TokenRecord> {
        let now = Utc::now();
        if let Some(entry) = self.records.get(key) {
            if entry.is_live_at(now) {
                return Some(entry.clone());
            }
            // expired: drop the read ref before removing
            drop(entry);
            // A concurrent writer may have replaced it in the meantime.
            self.records.remove_if(key, |_, record| !record.is_live_at(now));
        }
        None
    }

    /// Peek without evicting, expired or not.
    pub fn peek(&self, key: &ScopeKey) -> Option<TokenRecord> {
        self.records.get(key).map(|entry| entry.clone())
    }

    /// Insert or replace the record for its scope.
    pub fn put(&self, record: TokenRecord) {
        self.records.insert(record.scope_key.clone(), record);
    }

    pub fn remove(&self, key: &ScopeKey) -> Option<TokenRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    /// Remove all expired records. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.is_live_at(now));
        before.saturating_sub(self.records.len())
    }

    /// Number of unexpired per-account records.
    pub fn live_account_count(&self) -> usize {
        let now = Utc::now();
        self.records
            .iter()
            .filter(|entry| matches!(entry.key(), ScopeKey::Account(_)) && entry.is_live_at(now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired(scope: ScopeKey, value: &str) -> TokenRecord {
        let mut record = TokenRecord::new(scope, value.to_string(), Duration::from_secs(60));
        record.expires_at = record.fetched_at - chrono::Duration::seconds(1);
        record
    }

    #[test]
    fn test_scope_key_display() {
        assert_eq!(ScopeKey::Default.to_string(), "default");
        assert_eq!(ScopeKey::Account("42".into()).to_string(), "account:42");
    }

    #[test]
    fn test_put_replaces_existing_record() {
        let cache = TokenCache::new();
        let scope = ScopeKey::Account("7".into());
        cache.put(TokenRecord::new(scope.clone(), "old".into(), Duration::from_secs(60)));
        cache.put(TokenRecord::new(scope.clone(), "new".into(), Duration::from_secs(60)));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_live(&scope).unwrap().value, "new");
    }

    #[test]
    fn test_get_live_evicts_expired_record() {
        let cache = TokenCache::new();
        cache.put(expired(ScopeKey::Default, "stale"));

        assert!(cache.get_live(&ScopeKey::Default).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_is_immediately_stale() {
        let record = TokenRecord::new(ScopeKey::Default, "t".into(), Duration::ZERO);
        assert!(!record.is_live_at(Utc::now()));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let record = TokenRecord::new(ScopeKey::Default, "t".into(), Duration::from_secs(u64::MAX));
        assert!(record.is_live_at(Utc::now()));
    }

    #[test]
    fn test_evict_expired_counts_and_keeps_live() {
        let cache = TokenCache::new();
        cache.put(expired(ScopeKey::Account("a".into()), "x"));
        cache.put(expired(ScopeKey::Account("b".into()), "y"));
        cache.put(TokenRecord::new(
            ScopeKey::Account("c".into()),
            "z".into(),
            Duration::from_secs(60),
        ));

        assert_eq!(cache.evict_expired(), 2);
        assert_eq!(cache.live_account_count(), 1);
    }

    #[test]
    fn test_debug_hides_token_value() {
        let record = TokenRecord::new(ScopeKey::Default, "secret-bearer".into(), Duration::from_secs(1));
        assert!(!format!("{:?}", record).contains("secret-bearer"));
    }
}
