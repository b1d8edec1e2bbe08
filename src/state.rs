//! Application state
//!
//! Holds configuration and all shared components

use crate::ai_client::{AiClient, DEFAULT_JPEG_QUALITY};
use crate::camera_pipeline::{PipelineConfig, PipelineManager};
use crate::camera_registry::CameraRegistry;
use crate::error::{Error, Result};
use crate::geometry::Resolution;
use crate::push_channel::PushChannel;
use crate::store::{AggregateStore, DEFAULT_ALERT_CAPACITY, DEFAULT_CONFIDENCE_THRESHOLD};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Highest accepted display refresh rate
pub const MAX_RENDER_FPS: u32 = 240;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Inference service base URL (`POST /detect`, `GET /health`)
    pub inference_url: String,
    /// Push channel address
    pub push_url: String,
    /// Camera discovery service base URL
    pub discovery_url: String,
    /// Base URL relative stream locators are resolved against
    pub stream_base_url: String,
    /// Snapshot URL template (`SNAPSHOT_URL_TEMPLATE`)
    ///
    /// Without one, each camera's stream locator must itself serve a JPEG or
    /// PNG snapshot per GET. Discovery services that hand out video files
    /// (`/videos/*.mp4`) need a template that maps cameras to a snapshot
    /// endpoint, e.g. `http://go2rtc:1984/api/frame.jpeg?src={id}`.
    /// `{id}` and `{locator}` are substituted URL-encoded.
    pub snapshot_url_template: Option<String>,
    /// View API host
    pub host: String,
    /// View API port
    pub port: u16,
    pub infer_interval_ms: u64,
    pub render_fps: u32,
    pub working_width: u32,
    pub working_height: u32,
    pub confidence_threshold: f32,
    pub alert_capacity: usize,
    pub reconnect_delay_ms: u64,
    pub health_poll_secs: u64,
    pub inference_timeout_ms: u64,
    /// TTF/OTF font for overlay labels; boxes are drawn without text when unset
    pub overlay_font: Option<PathBuf>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let discovery_url = std::env::var("DISCOVERY_URL")
            .unwrap_or_else(|_| "http://localhost:3002".to_string());
        Self {
            inference_url: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            push_url: std::env::var("PUSH_URL")
                .unwrap_or_else(|_| "ws://localhost:8080/ws".to_string()),
            stream_base_url: std::env::var("STREAM_BASE_URL")
                .unwrap_or_else(|_| discovery_url.clone()),
            snapshot_url_template: std::env::var("SNAPSHOT_URL_TEMPLATE").ok(),
            discovery_url,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8090),
            infer_interval_ms: env_or("INFER_INTERVAL_MS", 1000),
            render_fps: env_or("RENDER_FPS", 30),
            working_width: env_or("WORKING_WIDTH", 640),
            working_height: env_or("WORKING_HEIGHT", 360),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD),
            alert_capacity: env_or("ALERT_CAPACITY", DEFAULT_ALERT_CAPACITY),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", 3000),
            health_poll_secs: env_or("HEALTH_POLL_SECS", 10),
            inference_timeout_ms: env_or("INFERENCE_TIMEOUT_MS", 10_000),
            overlay_font: std::env::var("OVERLAY_FONT").ok().map(PathBuf::from),
        }
    }
}

impl AppConfig {
    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.infer_interval_ms == 0 {
            return Err(Error::Config("INFER_INTERVAL_MS must be > 0".to_string()));
        }
        if self.render_fps == 0 || self.render_fps > MAX_RENDER_FPS {
            return Err(Error::Config(format!(
                "RENDER_FPS {} outside 1..={}",
                self.render_fps, MAX_RENDER_FPS
            )));
        }
        if self.working_width == 0 || self.working_height == 0 {
            return Err(Error::Config(format!(
                "working resolution {}x{} is empty",
                self.working_width, self.working_height
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "CONFIDENCE_THRESHOLD {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.alert_capacity == 0 {
            return Err(Error::Config("ALERT_CAPACITY must be > 0".to_string()));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(Error::Config("RECONNECT_DELAY_MS must be > 0".to_string()));
        }
        if self.health_poll_secs == 0 {
            return Err(Error::Config("HEALTH_POLL_SECS must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn working_resolution(&self) -> Resolution {
        Resolution::from_pixels(self.working_width, self.working_height)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            infer_interval: Duration::from_millis(self.infer_interval_ms),
            render_interval: Duration::from_nanos(1_000_000_000 / u64::from(self.render_fps.max(1))),
            working: self.working_resolution(),
            display: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// AggregateStore (process-wide view state)
    pub store: Arc<AggregateStore>,
    /// AiClient (inference service adapter)
    pub ai_client: Arc<AiClient>,
    /// PipelineManager (one pipeline per camera)
    pub pipelines: Arc<PipelineManager>,
    /// PushChannel (server push singleton)
    pub push: Arc<PushChannel>,
    /// CameraRegistry (discovery)
    pub registry: Arc<CameraRegistry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            inference_url: "http://localhost:8000".to_string(),
            push_url: "ws://localhost:8080/ws".to_string(),
            discovery_url: "http://localhost:3002".to_string(),
            stream_base_url: "http://localhost:3002".to_string(),
            snapshot_url_template: None,
            host: "127.0.0.1".to_string(),
            port: 8090,
            infer_interval_ms: 1000,
            render_fps: 25,
            working_width: 640,
            working_height: 360,
            confidence_threshold: 0.5,
            alert_capacity: 100,
            reconnect_delay_ms: 3000,
            health_poll_secs: 10,
            inference_timeout_ms: 10_000,
            overlay_font: None,
        }
    }

    #[test]
    fn test_validate_rejects_impossible_values() {
        assert!(config().validate().is_ok());

        let mut c = config();
        c.working_height = 0;
        assert!(matches!(c.validate(), Err(Error::Config(_))));

        let mut c = config();
        c.confidence_threshold = 1.5;
        assert!(c.validate().is_err());

        let mut c = config();
        c.infer_interval_ms = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_render_fps_is_bounded() {
        let mut c = config();
        c.render_fps = MAX_RENDER_FPS;
        assert!(c.validate().is_ok());
        assert!(c.pipeline_config().render_interval > Duration::ZERO);

        c.render_fps = MAX_RENDER_FPS + 1;
        assert!(matches!(c.validate(), Err(Error::Config(_))));

        c.render_fps = 2_000_000_000;
        assert!(c.validate().is_err());

        c.render_fps = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_pipeline_config_derivation() {
        let p = config().pipeline_config();
        assert_eq!(p.infer_interval, Duration::from_millis(1000));
        assert_eq!(p.render_interval, Duration::from_millis(40));
        assert_eq!(p.working, Resolution::new(640.0, 360.0));
        assert_eq!(config().reconnect_delay(), Duration::from_secs(3));
    }
}
