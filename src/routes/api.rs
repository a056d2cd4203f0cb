use crate::handlers::{diagnostics, health_check, ready_check, room_latest};
use crate::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/rooms/:room_id/latest", get(room_latest))
        .with_state(app_state)
}
