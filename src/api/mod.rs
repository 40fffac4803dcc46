use std::sync::Arc;

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    routing::{any, get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::broker::CredentialBroker;
use crate::config::Config;
use crate::proxy;

pub mod handlers;

/// Shared application state passed to handlers.
pub struct AppState {
    pub broker: CredentialBroker,
    pub io_api: proxy::upstream::IoApiClient,
    pub config: Config,
}

/// Build the full gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", get(handlers::metrics))
        // Token management
        .route("/api/token/status", get(handlers::token_status))
        .route("/api/token/io", get(handlers::refresh_io_token))
        .route("/api/token/login", post(handlers::refresh_login_token))
        .route("/api/token/ensure", get(handlers::ensure_tokens))
        // Self token endpoint, target of the broker's account lookup
        .route(
            "/api/Customer/GetTokenAsyncNew",
            get(handlers::get_token_async_new),
        )
        // Authenticated pass-through to the I/O API
        .route(
            "/api/common/*path",
            any(proxy::handler::io_proxy_handler),
        )
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // The front-end is served from several origins; reflect whichever calls.
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::list([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("apikey"),
                    HeaderName::from_static("accept"),
                ]))
                .allow_credentials(true),
        )
        .layer(axum::middleware::from_fn(request_id_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with gateway logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
