//! Health check endpoint.
//!
//! Always 200 once the server is up. Reports which session backend and
//! template source the process was configured with.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: &'static str,
    templates: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.config();
    Json(HealthResponse {
        status: "healthy",
        sessions: if config.redis_url.is_some() {
            "redis"
        } else {
            "memory"
        },
        templates: if config.template_dir.is_some() {
            "custom"
        } else {
            "builtin"
        },
    })
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
