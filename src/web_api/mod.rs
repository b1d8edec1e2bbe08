//! WebAPI - Read-Only View API
//!
//! ## Responsibilities
//!
//! - Expose store snapshots, alerts and camera status as JSON
//! - Serve each camera's latest rendered frame (with overlay) as JPEG
//! - The only write paths: confidence threshold and clearing alerts

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::models::ChannelStatus;
use crate::state::AppState;

/// Response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { ok: true, data }
    }
}

/// Liveness plus connectivity summary
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub push_channel: ChannelStatus,
    pub inference_healthy: Option<bool>,
    pub cameras: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let connectivity = state.store.connectivity();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        push_channel: connectivity.push_channel,
        inference_healthy: connectivity.inference_healthy,
        cameras: state.pipelines.len().await,
    })
}
