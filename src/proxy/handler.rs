//! `/api/common/*` pass-through to the clinical I/O API.
//!
//! Callers may bring their own `apikey`/`x-api-key`. Otherwise the gateway
//! injects `apikey: Bearer <token>` for the configured default account, and
//! invalidates that token if the upstream answers 401.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::AppState;
use crate::broker::cache::ScopeKey;
use crate::errors::AppError;

/// Request headers passed through to the upstream.
const FORWARDED_HEADERS: &[&str] = &["content-type", "accept", "authorization", "apikey", "x-api-key"];

pub async fn io_proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let target = state.io_api.target_url(&path, query.as_deref())?;

    let mut out_headers = pick_headers(&headers);
    let caller_has_key =
        out_headers.contains_key("apikey") || out_headers.contains_key("x-api-key");

    let injected_scope = if caller_has_key {
        None
    } else {
        let account_id = state
            .config
            .default_account_id
            .as_deref()
            .ok_or_else(|| AppError::NotConfigured("ACCOUNT_ID not configured".into()))?;
        let token = state.broker.token_for_account(account_id).await?;
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| AppError::Upstream(format!("token is not a valid header value: {}", e)))?;
        out_headers.insert(HeaderName::from_static("apikey"), value);
        Some(ScopeKey::Account(account_id.trim().to_string()))
    };

    tracing::info!(
        method = %method,
        target = %target,
        injected_token = injected_scope.is_some(),
        "io proxy forward"
    );

    let resp = state
        .io_api
        .send(method.clone(), &target, out_headers, body)
        .await?;

    if resp.status == StatusCode::UNAUTHORIZED {
        if let Some(scope) = &injected_scope {
            state.broker.invalidate(scope);
        }
    }

    tracing::info!(
        method = %method,
        target = %target,
        status = resp.status.as_u16(),
        "io proxy response"
    );

    let mut response = (resp.status, resp.body).into_response();
    if let Some(ct) = resp.content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    Ok(response)
}

fn pick_headers(headers: &HeaderMap) -> HeaderMap {
    let mut picked = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(*name) {
            picked.insert(HeaderName::from_static(*name), value.clone());
        }
    }
    picked
}
