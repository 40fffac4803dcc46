use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::broker::cache::ScopeKey;
use crate::broker::retry::AttemptError;

/// Summary of one endpoint that gave up during an acquisition.
#[derive(Debug, Clone)]
pub struct EndpointFailure {
    pub endpoint: &'static str,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every endpoint of the strategy gave up. `failures` lists them in the
    /// order tried; `last` is the final underlying error.
    #[error("token acquisition for {scope} failed after {} endpoint(s): {last}", .failures.len())]
    Acquisition {
        scope: ScopeKey,
        failures: Vec<EndpointFailure>,
        #[source]
        last: AttemptError,
    },

    /// Non-2xx from the upstream, surfaced as-is in single-attempt mode.
    #[error("upstream rejected the token request with {status}: {body}")]
    UpstreamRejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Broker(BrokerError::InvalidArgument(m)) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_argument",
                m.clone(),
            ),
            AppError::Broker(BrokerError::UpstreamRejected { status, body }) => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "upstream_error",
                "upstream_rejected",
                body.clone(),
            ),
            AppError::Broker(e @ BrokerError::Configuration(_)) => {
                tracing::error!("broker misconfigured: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    "broker_not_configured",
                    e.to_string(),
                )
            }
            AppError::Broker(e @ BrokerError::Acquisition { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "authentication_error",
                "token_acquisition_failed",
                e.to_string(),
            ),
            AppError::NotConfigured(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                "not_configured",
                m.clone(),
            ),
            AppError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
