//! WebAPI - HTTP and WebSocket Endpoints
//!
//! ## Responsibilities
//!
//! - Stream endpoint (`/ws`)
//! - Health and session inspection routes
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let inference_ok = state.inference.health_check().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        active_connections: state.registry.active_count(),
        inference_connected: inference_ok,
    })
}
