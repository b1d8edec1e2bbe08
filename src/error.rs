//! Error handling for the PPE monitor client
//!
//! Pipeline and channel failures are contained at their component boundary;
//! only the view API turns an `Error` into an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Source frame not ready (skip tick, no status change)
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Inference request failed (network, HTTP status, timeout, decode)
    #[error("Inference failed{}: {message}", status_suffix(.status))]
    Inference { status: Option<u16>, message: String },

    /// Stream attach failed (fatal to that camera's pipeline)
    #[error("Stream attach failed for camera {camera_id}: {message}")]
    StreamAttach { camera_id: String, message: String },

    /// Push channel closed or could not be opened
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Inbound push message could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Non-finite or non-positive dimensions handed to the geometry mapper
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl Error {
    /// Build an inference failure from a reqwest error, keeping the HTTP status if any
    pub fn inference(e: reqwest::Error) -> Self {
        Error::Inference {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::InvalidGeometry(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_GEOMETRY", msg.clone())
            }
            Error::MalformedMessage(msg) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_MESSAGE", msg.clone())
            }
            Error::CaptureUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CAPTURE_UNAVAILABLE",
                msg.clone(),
            ),
            Error::Inference { .. } => (StatusCode::BAD_GATEWAY, "INFERENCE_ERROR", self.to_string()),
            Error::StreamAttach { .. } => (
                StatusCode::BAD_GATEWAY,
                "STREAM_ATTACH_ERROR",
                self.to_string(),
            ),
            Error::ChannelClosed(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CHANNEL_CLOSED", msg.clone())
            }
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Image(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IMAGE_ERROR",
                e.to_string(),
            ),
            Error::WebSocket(e) => (StatusCode::BAD_GATEWAY, "WEBSOCKET_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
