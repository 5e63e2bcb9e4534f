use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{cache, schema, AppState};
use crate::config::Config;
use crate::services::SchemaContextService;

/// Create router with application state
pub fn create_router_with_state(service: SchemaContextService, config: Config) -> Router {
    let state = AppState { service, config };

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/schema/context",
            get(schema::get_context).delete(schema::invalidate_context),
        )
        .route("/api/schema/state", get(schema::get_state))
        .route("/api/cache/stats", get(cache::get_stats))
        .route(
            "/api/cache/entries",
            get(cache::list_entries).delete(cache::clear_entries),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
