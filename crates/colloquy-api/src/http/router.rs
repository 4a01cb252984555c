//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Sessions
        .route(
            "/sessions",
            post(handlers::session::create_session).get(handlers::session::list_sessions),
        )
        .route(
            "/sessions/{id}",
            get(handlers::session::get_session)
                .patch(handlers::session::rename_session)
                .delete(handlers::session::delete_session),
        )
        .route(
            "/sessions/{id}/duplicate",
            post(handlers::session::duplicate_session),
        )
        .route(
            "/sessions/{id}/activity",
            get(handlers::session::session_activity),
        )
        // Messages
        .route(
            "/sessions/{id}/messages",
            post(handlers::message::send_message),
        )
        .route(
            "/sessions/{id}/messages/{mid}/retry",
            post(handlers::message::retry),
        )
        .route(
            "/sessions/{id}/messages/{mid}/edit",
            post(handlers::message::edit_and_resend),
        )
        .route(
            "/sessions/{id}/messages/{mid}/cancel",
            post(handlers::message::cancel),
        )
        .route(
            "/sessions/{id}/messages/{mid}/navigate",
            post(handlers::message::navigate),
        )
        .route(
            "/sessions/{id}/messages/{mid}/position",
            get(handlers::message::position),
        )
        .route(
            "/sessions/{id}/messages/{mid}/content-flags",
            put(handlers::message::attach_content_flags),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint (no owner required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
