//! Acquisition strategies: an ordered list of token endpoints sharing one
//! retry policy. The broker tries each endpoint in turn and stops at the
//! first token.

use std::time::Duration;
use url::Url;

use super::retry::RetryPolicy;
use crate::config::{BrokerConfig, LoginCredentials};
use crate::errors::BrokerError;

pub const ACCOUNT_TOKEN_PATH: &str = "/api/Customer/GetTokenAsyncNew";
pub const LOGIN_PATH: &str = "/api/Auth/login";

pub enum EndpointRequest {
    Get,
    /// JSON body. May hold credentials, so `Endpoint` is deliberately not `Debug`.
    PostJson(serde_json::Value),
}

/// One token-issuing URL and how to call it.
pub struct Endpoint {
    pub name: &'static str,
    pub url: Url,
    pub timeout: Duration,
    pub request: EndpointRequest,
}

pub struct Strategy {
    pub name: &'static str,
    pub endpoints: Vec<Endpoint>,
    pub retry: RetryPolicy,
}

/// Login: POST username/password to the upstream auth endpoint.
pub fn login(config: &BrokerConfig) -> Result<Strategy, BrokerError> {
    let base = require_upstream(config)?;
    let LoginCredentials { username, password } = config.login.clone().ok_or_else(|| {
        BrokerError::Configuration("LOGIN_USERNAME/LOGIN_PASSWORD not configured".into())
    })?;

    Ok(Strategy {
        name: "login",
        endpoints: vec![Endpoint {
            name: "upstream_login",
            url: join(base, LOGIN_PATH)?,
            timeout: config.upstream_timeout,
            request: EndpointRequest::PostJson(serde_json::json!({
                "username": username,
                "password": password,
            })),
        }],
        retry: config.login_retry.clone(),
    })
}

/// Account lookup: this gateway's own token endpoint first, then the
/// upstream directly. Either base URL may be absent, but not both.
pub fn account_lookup(config: &BrokerConfig, account_id: &str) -> Result<Strategy, BrokerError> {
    let mut endpoints = Vec::with_capacity(2);
    if let Some(base) = config.self_base_url.as_deref() {
        endpoints.push(account_endpoint("self", base, account_id, config.self_timeout)?);
    }
    if let Some(base) = config.upstream_base_url.as_deref() {
        endpoints.push(account_endpoint(
            "upstream_direct",
            base,
            account_id,
            config.upstream_timeout,
        )?);
    }
    if endpoints.is_empty() {
        return Err(BrokerError::Configuration(
            "neither SELF_BASE_URL nor AISCRIBE_API_BASE is configured".into(),
        ));
    }

    Ok(Strategy {
        name: "account_lookup",
        endpoints,
        retry: config.account_retry.clone(),
    })
}

/// Direct upstream only, one attempt. Serves the self endpoint, so a chained
/// lookup always bottoms out here instead of calling back into itself.
pub fn direct(config: &BrokerConfig, account_id: &str) -> Result<Strategy, BrokerError> {
    let base = require_upstream(config)?;
    Ok(Strategy {
        name: "direct",
        endpoints: vec![account_endpoint(
            "upstream_direct",
            base,
            account_id,
            config.upstream_timeout,
        )?],
        retry: RetryPolicy::single(),
    })
}

fn account_endpoint(
    name: &'static str,
    base: &str,
    account_id: &str,
    timeout: Duration,
) -> Result<Endpoint, BrokerError> {
    let mut url = join(base, ACCOUNT_TOKEN_PATH)?;
    url.query_pairs_mut().append_pair("accountId", account_id);
    Ok(Endpoint {
        name,
        url,
        timeout,
        request: EndpointRequest::Get,
    })
}

fn require_upstream(config: &BrokerConfig) -> Result<&str, BrokerError> {
    config
        .upstream_base_url
        .as_deref()
        .ok_or_else(|| BrokerError::Configuration("AISCRIBE_API_BASE not configured".into()))
}

fn join(base: &str, path: &str) -> Result<Url, BrokerError> {
    let raw = format!("{}{}", base.trim_end_matches('/'), path);
    Url::parse(&raw)
        .map_err(|e| BrokerError::Configuration(format!("invalid base URL '{}': {}", base, e)))
}
