//! HTTP route handlers.

pub mod contact;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// All application routes, without session or tracing layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(contact::router())
        .merge(health::router())
        .with_state(state)
}
