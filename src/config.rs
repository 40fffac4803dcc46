use std::fmt;
use std::time::Duration;

use crate::broker::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Base URL of the clinical I/O API that `/api/common/*` is proxied to.
    pub io_api_base: Option<String>,
    /// Account whose token is injected by the proxy when the caller sends none.
    /// Set via ACCOUNT_ID.
    pub default_account_id: Option<String>,
    /// SELF_BASE_URL was given explicitly, so a port change leaves it alone.
    pub self_base_url_pinned: bool,
    pub broker: BrokerConfig,
}

impl Config {
    /// Bind to `port`. Unless SELF_BASE_URL was set, the self endpoint follows.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        if !self.self_base_url_pinned {
            self.broker.self_base_url = Some(default_self_base_url(port));
        }
        self
    }
}

/// Username/password pair for the upstream login endpoint.
#[derive(Clone, PartialEq)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Everything the credential broker needs to reach its token endpoints.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Upstream clinical API (login + direct account token). AISCRIBE_API_BASE.
    pub upstream_base_url: Option<String>,
    /// This gateway's own base URL, tried first for account tokens. SELF_BASE_URL.
    pub self_base_url: Option<String>,
    pub login: Option<LoginCredentials>,
    /// TTL applied when the upstream gives no hint. TOKEN_CACHE_TTL_SECS.
    pub default_ttl: Duration,
    pub login_retry: RetryPolicy,
    pub account_retry: RetryPolicy,
    pub self_timeout: Duration,
    pub upstream_timeout: Duration,
    /// Skip TLS certificate verification. Never allowed with ENV=production.
    pub allow_insecure_tls: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: None,
            self_base_url: Some(default_self_base_url(DEFAULT_PORT)),
            login: None,
            default_ttl: Duration::from_secs(600),
            login_retry: RetryPolicy::default(),
            account_retry: RetryPolicy::default(),
            self_timeout: Duration::from_millis(45_000),
            upstream_timeout: Duration::from_millis(10_000),
            allow_insecure_tls: false,
        }
    }
}

const DEFAULT_PORT: u16 = 5000;

fn default_self_base_url(port: u16) -> String {
    format!("http://localhost:{}", port)
}

/// Strip stray backticks and whitespace, then any trailing slash.
/// Returns `None` when nothing usable is left.
pub fn sanitize_base_url(raw: &str) -> Option<String> {
    let cleaned = raw.replace('`', "");
    let trimmed = cleaned.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build the config from an arbitrary key lookup. `load()` passes the process
/// environment; tests pass a map.
pub fn from_lookup<F>(get: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let parse_u64 = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());

    let allow_insecure_tls = get("ALLOW_INSECURE_TLS").as_deref() == Some("true");
    if allow_insecure_tls {
        let env_mode = get("ENV")
            .or_else(|| get("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "ALLOW_INSECURE_TLS=true is not permitted when ENV=production. \
                 Remove it or point the gateway at hosts with valid certificates."
            );
        }
    }

    let login = match (get("LOGIN_USERNAME"), get("LOGIN_PASSWORD")) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            Some(LoginCredentials { username, password })
        }
        _ => None,
    };

    let base_retry = RetryPolicy {
        max_attempts: parse_u64("TOKEN_FETCH_RETRIES")
            .map(|n| n.max(1) as u32)
            .unwrap_or(3),
        base_backoff_ms: parse_u64("TOKEN_BACKOFF_BASE_MS").unwrap_or(1_000),
        max_backoff_ms: parse_u64("TOKEN_BACKOFF_MAX_MS").unwrap_or(8_000),
        jitter_ms: parse_u64("TOKEN_BACKOFF_JITTER_MS").unwrap_or(0),
    };
    let with_attempts = |key: &str| RetryPolicy {
        max_attempts: parse_u64(key)
            .map(|n| n.max(1) as u32)
            .unwrap_or(base_retry.max_attempts),
        ..base_retry.clone()
    };

    let port = get("PORT")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let explicit_self_base_url = get("SELF_BASE_URL").and_then(|v| sanitize_base_url(&v));
    let self_base_url_pinned = explicit_self_base_url.is_some();

    let broker = BrokerConfig {
        upstream_base_url: get("AISCRIBE_API_BASE").and_then(|v| sanitize_base_url(&v)),
        self_base_url: Some(
            explicit_self_base_url.unwrap_or_else(|| default_self_base_url(port)),
        ),
        login,
        default_ttl: Duration::from_secs(parse_u64("TOKEN_CACHE_TTL_SECS").unwrap_or(600)),
        login_retry: with_attempts("LOGIN_RETRIES"),
        account_retry: with_attempts("ACCOUNT_LOOKUP_RETRIES"),
        self_timeout: Duration::from_millis(parse_u64("SELF_FETCH_TIMEOUT_MS").unwrap_or(45_000)),
        upstream_timeout: Duration::from_millis(
            parse_u64("UPSTREAM_FETCH_TIMEOUT_MS").unwrap_or(10_000),
        ),
        allow_insecure_tls,
    };

    Ok(Config {
        port,
        io_api_base: get("IO_API_BASE").and_then(|v| sanitize_base_url(&v)),
        default_account_id: get("ACCOUNT_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        self_base_url_pinned,
        broker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let cfg = from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 5000);
        assert!(cfg.io_api_base.is_none());
        assert!(cfg.broker.upstream_base_url.is_none());
        assert_eq!(cfg.broker.self_base_url.as_deref(), Some("http://localhost:5000"));
        assert_eq!(cfg.broker.default_ttl, Duration::from_secs(600));
        assert_eq!(cfg.broker.login_retry.max_attempts, 3);
        assert_eq!(cfg.broker.self_timeout, Duration::from_secs(45));
        assert_eq!(cfg.broker.upstream_timeout, Duration::from_secs(10));
        assert!(!cfg.broker.allow_insecure_tls, "TLS verification must be on by default");
    }

    #[test]
    fn test_base_urls_are_sanitized() {
        let cfg = from_lookup(lookup(&[
            ("AISCRIBE_API_BASE", " https://api.example.com/ "),
            ("SELF_BASE_URL", "`http://127.0.0.1:5000/`"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.broker.upstream_base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(cfg.broker.self_base_url.as_deref(), Some("http://127.0.0.1:5000"));
        assert_eq!(sanitize_base_url("  / "), None);
    }

    #[test]
    fn test_default_self_base_url_follows_port() {
        let cfg = from_lookup(lookup(&[("PORT", "8080")])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.broker.self_base_url.as_deref(), Some("http://localhost:8080"));

        // serve --port overrides PORT after loading
        let cfg = cfg.with_port(9090);
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.broker.self_base_url.as_deref(), Some("http://localhost:9090"));
    }

    #[test]
    fn test_explicit_self_base_url_ignores_port() {
        let cfg = from_lookup(lookup(&[
            ("PORT", "8080"),
            ("SELF_BASE_URL", "http://gateway.internal:5000"),
        ]))
        .unwrap();
        assert!(cfg.self_base_url_pinned);
        assert_eq!(
            cfg.with_port(9090).broker.self_base_url.as_deref(),
            Some("http://gateway.internal:5000")
        );
    }

    #[test]
    fn test_per_strategy_retry_overrides() {
        let cfg = from_lookup(lookup(&[
            ("TOKEN_FETCH_RETRIES", "5"),
            ("LOGIN_RETRIES", "2"),
            ("TOKEN_BACKOFF_BASE_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(cfg.broker.login_retry.max_attempts, 2);
        assert_eq!(cfg.broker.account_retry.max_attempts, 5);
        assert_eq!(cfg.broker.login_retry.base_backoff_ms, 250);
        assert_eq!(cfg.broker.account_retry.base_backoff_ms, 250);
    }

    #[test]
    fn test_zero_retries_still_makes_one_attempt() {
        let cfg = from_lookup(lookup(&[("TOKEN_FETCH_RETRIES", "0")])).unwrap();
        assert_eq!(cfg.broker.account_retry.max_attempts, 1);
    }

    #[test]
    fn test_login_requires_both_fields() {
        let cfg = from_lookup(lookup(&[("LOGIN_USERNAME", "scribe")])).unwrap();
        assert!(cfg.broker.login.is_none());

        let cfg = from_lookup(lookup(&[
            ("LOGIN_USERNAME", "scribe"),
            ("LOGIN_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        let login = cfg.broker.login.unwrap();
        assert_eq!(login.username, "scribe");
        assert!(!format!("{:?}", login).contains("hunter2"));
    }

    #[test]
    fn test_insecure_tls_rejected_in_production() {
        let err = from_lookup(lookup(&[
            ("ALLOW_INSECURE_TLS", "true"),
            ("ENV", "production"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("ALLOW_INSECURE_TLS"));

        let cfg = from_lookup(lookup(&[("ALLOW_INSECURE_TLS", "1")])).unwrap();
        assert!(!cfg.broker.allow_insecure_tls, "only the literal 'true' enables it");
    }

    #[test]
    fn test_insecure_tls_allowed_outside_production() {
        let cfg = from_lookup(lookup(&[("ALLOW_INSECURE_TLS", "true"), ("ENV", "staging")])).unwrap();
        assert!(cfg.broker.allow_insecure_tls);
        // The broker logs the warning when it builds its client
        assert!(crate::broker::CredentialBroker::new(cfg.broker).is_ok());
    }
}
