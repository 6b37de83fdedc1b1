//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Admission middleware in front of every route
//! - Response formatting

mod guard_layer;
mod routes;

pub use guard_layer::{admission_guard, rejection_response};
pub use routes::{create_router, LIST_LIMIT_MAX, LIST_LIMIT_MIN};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::Result;
use crate::models::{ApiResponse, HealthResponse, StatusResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime_sec(),
    })
}

/// Status endpoint: guard and store counters
pub async fn device_status(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let store = state.store.counts()?;
    let guard = state.guard.stats();

    Ok(Json(ApiResponse::success(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime_sec(),
        guard,
        store,
    })))
}
