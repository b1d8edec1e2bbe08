//! AIClient - Inference Service Adapter
//!
//! ## Responsibilities
//!
//! - Encode a captured frame as JPEG
//! - Submit it to `POST /detect?confidence=<threshold>`
//! - Decode detections + safety summary, measuring wall-clock latency
//! - Poll `GET /health` for the global connectivity indicator
//!
//! The client is stateless apart from its base URL; keeping at most one
//! request in flight per camera is the caller's job (see `camera_pipeline`).

use crate::error::{Error, Result};
use crate::models::{DetectionResult, InferenceOutcome};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// JPEG quality used for inference uploads
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Something that turns an encoded frame into detections
#[async_trait]
pub trait Detector: Send + Sync {
    /// Run detection on one JPEG frame
    async fn detect(&self, frame: Vec<u8>, confidence: f32) -> Result<InferenceOutcome>;

    /// Whether the service reports itself ready
    async fn health_check(&self) -> bool;
}

/// `GET /health` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" || self.model_loaded
    }
}

/// HTTP inference client
pub struct AiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AiClient {
    /// Create new AI client with custom timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Create new AI client (10s timeout)
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Send one frame for detection
    pub async fn detect_frame(&self, frame: Vec<u8>, confidence: f32) -> Result<InferenceOutcome> {
        let url = format!("{}/detect", self.base_url);

        let form = Form::new().part(
            "file",
            Part::bytes(frame)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")
                .map_err(Error::inference)?,
        );

        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .query(&[("confidence", confidence)])
            .multipart(form)
            .send()
            .await
            .map_err(Error::inference)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Inference {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let result: DetectionResult = resp.json().await.map_err(Error::inference)?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let safety = result.safety();
        Ok(InferenceOutcome {
            detections: result.detections,
            safety,
            latency_ms,
            server_processing_ms: result.processing_time_ms,
        })
    }

    /// Check service health
    pub async fn check_health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Inference {
                status: Some(resp.status().as_u16()),
                message: "health check failed".to_string(),
            });
        }

        Ok(resp.json().await?)
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Detector for AiClient {
    async fn detect(&self, frame: Vec<u8>, confidence: f32) -> Result<InferenceOutcome> {
        self.detect_frame(frame, confidence).await
    }

    async fn health_check(&self) -> bool {
        match self.check_health().await {
            Ok(health) => health.is_healthy(),
            Err(e) => {
                tracing::debug!(error = %e, "Inference health check failed");
                false
            }
        }
    }
}

/// Encode a frame as JPEG for upload
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((frame.width() * frame.height()) as usize / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode_image(frame)?;
    Ok(buf)
}
