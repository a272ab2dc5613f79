//! Axum router construction for the observer API.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete router.
///
/// CORS allows any origin so a locally served dashboard can call the API.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/api/projects", get(handlers::list_projects))
        .route("/api/projects/{key}/status", get(handlers::get_status))
        .route("/api/projects/{key}/world", get(handlers::get_world))
        .route("/api/projects/{key}/decision", get(handlers::get_decision))
        .route("/api/projects/{key}/scenes", get(handlers::list_scenes))
        .route("/api/projects/{key}/export", get(handlers::export_project))
        .route("/api/projects/{key}/cancel", post(handlers::cancel))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
