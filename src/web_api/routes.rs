//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::ai_client::encode_jpeg;
use crate::error::{Error, Result};
use crate::models::{Alert, CameraDetections, CameraSource, ConnectionStatus};
use crate::state::AppState;
use crate::store::StoreSnapshot;

const FRAME_JPEG_QUALITY: u8 = 85;
const DEFAULT_ALERT_LIMIT: usize = 50;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(super::health_check))
        // Aggregate view
        .route("/api/state", get(get_state))
        // Alerts
        .route("/api/alerts", get(list_alerts).delete(clear_alerts))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/:id/frame.jpg", get(get_camera_frame))
        // Settings
        .route("/api/settings/confidence", put(update_confidence))
        .with_state(state)
}

// ========================================
// Aggregate view
// ========================================

async fn get_state(State(state): State<AppState>) -> Json<ApiResponse<StoreSnapshot>> {
    Json(ApiResponse::success(state.store.snapshot()))
}

// ========================================
// Alerts
// ========================================

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<usize>,
    pub camera_id: Option<String>,
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Json<ApiResponse<Vec<Alert>>> {
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT);
    let alerts = match &query.camera_id {
        Some(camera_id) => state.store.alerts_for_camera(camera_id, limit),
        None => state.store.alerts(limit),
    };
    Json(ApiResponse::success(alerts))
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

async fn clear_alerts(State(state): State<AppState>) -> Json<ApiResponse<ClearedResponse>> {
    let cleared = state.store.alert_count();
    state.store.clear_alerts();
    Json(ApiResponse::success(ClearedResponse { cleared }))
}

// ========================================
// Cameras
// ========================================

#[derive(Debug, Serialize)]
pub struct CameraView {
    #[serde(flatten)]
    pub camera: CameraSource,
    pub status: Option<ConnectionStatus>,
    pub detections: Option<CameraDetections>,
}

async fn list_cameras(State(state): State<AppState>) -> Json<ApiResponse<Vec<CameraView>>> {
    let cameras = state
        .store
        .cameras()
        .into_iter()
        .map(|camera| CameraView {
            status: state.store.camera_status(&camera.id),
            detections: state.store.camera_detections(&camera.id),
            camera,
        })
        .collect();
    Json(ApiResponse::success(cameras))
}

/// Latest rendered frame with boxes and latency drawn on it
async fn get_camera_frame(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Response> {
    let pipeline = state
        .pipelines
        .get(&camera_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))?;

    let frame = pipeline
        .latest_frame()
        .ok_or_else(|| Error::CaptureUnavailable(format!("no frame rendered for {}", camera_id)))?;

    let jpeg = encode_jpeg(&frame.image, FRAME_JPEG_QUALITY)?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        jpeg,
    )
        .into_response())
}

// ========================================
// Settings
// ========================================

#[derive(Debug, Deserialize)]
pub struct ConfidenceRequest {
    pub threshold: f32,
}

#[derive(Debug, Serialize)]
pub struct ConfidenceResponse {
    pub confidence_threshold: f32,
}

async fn update_confidence(
    State(state): State<AppState>,
    Json(req): Json<ConfidenceRequest>,
) -> Result<Json<ApiResponse<ConfidenceResponse>>> {
    state.store.set_confidence_threshold(req.threshold)?;
    Ok(Json(ApiResponse::success(ConfidenceResponse {
        confidence_threshold: state.store.confidence_threshold(),
    })))
}
