mod deployments;
mod events;
mod servers;

use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppContext;

pub use deployments::deployments_routes;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .nest("/deployments", deployments_routes())
        .route("/servers/test", post(servers::test_server))
        .route("/events", get(events::event_stream))
}

pub fn app(ctx: AppContext) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// `x-trace-id` header value, or a fresh UUID v4.
pub(crate) fn trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
