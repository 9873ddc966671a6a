//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Governance status
        .route("/status", get(handlers::get_status))
        .route("/status/stream", get(handlers::stream_status))
        .route("/assertions/:id", get(handlers::get_assertion))
        .route("/assertions/:id/review", post(handlers::review_assertion))
        .route("/cycles", post(handlers::trigger_cycle))
        // Overrides
        .route("/overrides", post(handlers::submit_override))
        // Audit ledger
        .route("/audit", get(handlers::query_audit))
        .route("/audit/summary", get(handlers::audit_summary))
        .route("/audit/verify", get(handlers::verify_audit));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
