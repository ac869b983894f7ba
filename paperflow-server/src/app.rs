use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use paperflow_engine::JobType;
use serde_json::json;

use crate::state::AppState;

// Default body limit: 2 MB, payloads are references, not document content.
const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Build the primary axum router with the provided shared application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/jobs",
            post(crate::handlers::jobs::submit::submit).get(crate::handlers::jobs::list::list),
        )
        .route("/jobs/{id}", get(crate::handlers::jobs::get::get_job))
        .route(
            "/jobs/{id}/cancel",
            post(crate::handlers::jobs::cancel::cancel),
        )
        .route(
            "/jobs/{id}/events",
            get(crate::handlers::jobs::events::events),
        )
        .route(
            "/dead-letters",
            get(crate::handlers::dead_letters::list::list),
        )
        .route(
            "/dead-letters/{id}",
            get(crate::handlers::dead_letters::get::get_dead_letter),
        )
        .route(
            "/dead-letters/{id}/reprocess",
            post(crate::handlers::dead_letters::reprocess::reprocess),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .layer(Extension(state))
}

async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Readiness includes current backlog depths so operators can see shedding
/// pressure building up.
async fn ready_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let depths: serde_json::Map<String, serde_json::Value> = JobType::ALL
        .iter()
        .map(|t| (t.to_string(), json!(state.engine.queue_depth(*t))))
        .collect();
    (StatusCode::OK, Json(json!({ "ready": true, "queueDepths": depths })))
}
