use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::broker::BrokerStatus;
use crate::errors::AppError;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct AccountQuery {
    #[serde(rename = "accountId")]
    pub account_id: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Self endpoint body when the upstream gave a TTL hint. The field name is one
/// the account lookup reads back, so the hint survives the extra hop.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintedTokenResponse {
    pub token: String,
    pub expires_in_seconds: f64,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnsureResponse {
    pub io_token: bool,
    pub auth_token: bool,
}

fn default_account(state: &AppState) -> Result<&str, AppError> {
    state
        .config
        .default_account_id
        .as_deref()
        .ok_or_else(|| AppError::NotConfigured("ACCOUNT_ID not configured".into()))
}

// ── Token management ─────────────────────────────────────────

pub async fn token_status(State(state): State<Arc<AppState>>) -> Json<BrokerStatus> {
    Json(state.broker.status())
}

/// Force a fresh token for the default account.
pub async fn refresh_io_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenResponse>, AppError> {
    let account_id = default_account(&state)?;
    let token = state.broker.refresh_account(account_id).await?;
    Ok(Json(TokenResponse { token }))
}

/// Force a fresh login token.
pub async fn refresh_login_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.broker.refresh_default().await?;
    Ok(Json(TokenResponse { token }))
}

/// Make sure both tokens are cached. The account token is required; the
/// login token is best-effort.
pub async fn ensure_tokens(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EnsureResponse>, AppError> {
    let account_id = default_account(&state)?;
    state.broker.token_for_account(account_id).await?;

    let auth_token = match state.broker.default_token().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("ensure: login token unavailable: {}", e);
            false
        }
    };

    Ok(Json(EnsureResponse {
        io_token: true,
        auth_token,
    }))
}

/// `GET /api/Customer/GetTokenAsyncNew?accountId=`
///
/// Target of the broker's self lookup. It only ever calls the upstream
/// directly, so a chained lookup can't loop back here. The token is returned
/// as a plain-text body, or as `{token, expiresInSeconds}` when the upstream
/// sent a TTL hint.
pub async fn get_token_async_new(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AccountQuery>,
) -> Result<Response, AppError> {
    let account_id = query.account_id.unwrap_or_default();
    let token = state.broker.fetch_direct(&account_id).await.map_err(|e| {
        tracing::error!(account_id = %account_id.trim(), "GetTokenAsyncNew failed: {}", e);
        e
    })?;
    Ok(match token.ttl {
        Some(ttl) => Json(HintedTokenResponse {
            token: token.value,
            expires_in_seconds: ttl.as_secs_f64(),
        })
        .into_response(),
        None => token.value.into_response(),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.broker.metrics().encode(),
    )
}
