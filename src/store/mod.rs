//! AggregateStore - Process-wide View State
//!
//! ## Responsibilities
//!
//! - Merge detection results from every camera pipeline and the push channel
//! - Hold aggregate metrics (last writer wins), zones, bounded alert history
//! - Hold per-camera connection status and the global connectivity indicator
//! - Hand out immutable snapshots to views
//!
//! ## Field ownership
//!
//! | Field | Writer |
//! |---|---|
//! | cameras | CameraRegistry |
//! | per-camera detections, status | CameraPipeline (detections also PushChannel) |
//! | metrics, alerts | CameraPipeline, PushChannel |
//! | zones, channel status | PushChannel |
//! | inference health | health poller |
//!
//! Every mutation is synchronous and completes under one lock acquisition, so
//! no update is ever observed half-applied. The lock is never held across an
//! await point.

mod alert_log;

pub use alert_log::AlertLog;

use crate::error::{Error, Result};
use crate::models::{
    Alert, AlertSeverity, CameraDetections, CameraSource, ChannelStatus, Connectivity,
    ConnectionStatus, DetectionBox, DetectionResult, InferenceOutcome, Metrics, MetricsPatch,
    SafetySummary, UpdateSource, Zone,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default alert history bound
pub const DEFAULT_ALERT_CAPACITY: usize = 100;

/// Default detection confidence threshold
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Immutable view of the store
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub cameras: Vec<CameraSource>,
    pub camera_status: BTreeMap<String, ConnectionStatus>,
    pub detections: BTreeMap<String, CameraDetections>,
    pub metrics: Metrics,
    pub alerts: Vec<Alert>,
    pub zones: Vec<Zone>,
    pub connectivity: Connectivity,
    pub confidence_threshold: f32,
    pub taken_at: DateTime<Utc>,
}

struct StoreState {
    cameras: Vec<CameraSource>,
    camera_status: HashMap<String, ConnectionStatus>,
    detections: HashMap<String, CameraDetections>,
    metrics: Metrics,
    alerts: AlertLog,
    zones: Vec<Zone>,
    connectivity: Connectivity,
    confidence_threshold: f32,
}

/// AggregateStore instance
pub struct AggregateStore {
    state: RwLock<StoreState>,
}

impl AggregateStore {
    /// Create new AggregateStore
    pub fn new(alert_capacity: usize, confidence_threshold: f32) -> Self {
        Self {
            state: RwLock::new(StoreState {
                cameras: Vec::new(),
                camera_status: HashMap::new(),
                detections: HashMap::new(),
                metrics: Metrics::default(),
                alerts: AlertLog::new(alert_capacity),
                zones: Vec::new(),
                connectivity: Connectivity::default(),
                confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================
    // Camera registry
    // ========================================

    /// Replace the camera list wholesale
    pub fn set_cameras(&self, cameras: Vec<CameraSource>) {
        let mut state = self.write();
        tracing::info!(count = cameras.len(), "Camera list replaced");
        state.cameras = cameras;
    }

    /// Drop per-camera state of a camera whose pipeline was torn down
    pub fn forget_camera(&self, camera_id: &str) {
        let mut state = self.write();
        state.detections.remove(camera_id);
        state.camera_status.remove(camera_id);
        tracing::debug!(camera_id = %camera_id, "Per-camera state dropped");
    }

    // ========================================
    // Camera pipelines
    // ========================================

    /// Connection status reported by a camera pipeline
    pub fn set_camera_status(&self, camera_id: &str, status: ConnectionStatus) {
        let mut state = self.write();
        let prev = state.camera_status.insert(camera_id.to_string(), status);
        if prev != Some(status) {
            tracing::info!(camera_id = %camera_id, status = ?status, "Camera status changed");
        }
    }

    /// Apply a completed pipeline inference; returns the number of alerts appended
    pub fn record_pipeline_result(&self, camera_id: &str, outcome: &InferenceOutcome) -> usize {
        self.apply_detection(
            camera_id,
            outcome.detections.clone(),
            outcome.safety.clone(),
            Some(outcome.latency_ms),
            UpdateSource::Pipeline,
        )
    }

    // ========================================
    // Push channel
    // ========================================

    /// Apply a `detection` push message; returns the number of alerts appended
    pub fn record_push_detection(&self, camera_id: &str, result: DetectionResult) -> usize {
        let safety = result.safety();
        let latency = (result.processing_time_ms > 0.0).then_some(result.processing_time_ms);
        self.apply_detection(
            camera_id,
            result.detections,
            safety,
            latency,
            UpdateSource::PushChannel,
        )
    }

    /// Merge a `metrics` push message into the aggregate metrics
    pub fn merge_metrics(&self, patch: &MetricsPatch) {
        let mut state = self.write();
        state.metrics.apply(patch);
    }

    /// Replace the zone list wholesale
    pub fn replace_zones(&self, zones: Vec<Zone>) {
        let mut state = self.write();
        tracing::debug!(count = zones.len(), "Zones replaced");
        state.zones = zones;
    }

    /// Push channel lifecycle status
    pub fn set_channel_state(&self, status: ChannelStatus, retry_count: u32) {
        let mut state = self.write();
        state.connectivity.push_channel = status;
        state.connectivity.push_retry_count = retry_count;
    }

    // ========================================
    // Alerts / settings / health
    // ========================================

    /// Append an alert
    pub fn push_alert(&self, alert: Alert) {
        let mut state = self.write();
        Self::append_alert(&mut state, alert);
    }

    /// Remove all alerts
    pub fn clear_alerts(&self) {
        let mut state = self.write();
        if state.alerts.is_empty() {
            return;
        }
        let cleared = state.alerts.len();
        state.alerts.clear();
        tracing::info!(cleared = cleared, "Alerts cleared");
    }

    /// Result of the latest inference health poll
    pub fn set_inference_health(&self, healthy: bool) {
        let mut state = self.write();
        if state.connectivity.inference_healthy != Some(healthy) {
            if healthy {
                tracing::info!("Inference service healthy");
            } else {
                tracing::warn!("Inference service unhealthy");
            }
        }
        state.connectivity.inference_healthy = Some(healthy);
        state.connectivity.last_health_check = Some(Utc::now());
    }

    /// Current confidence threshold used by pipelines
    pub fn confidence_threshold(&self) -> f32 {
        self.read().confidence_threshold
    }

    /// Change the confidence threshold (must be within [0, 1])
    pub fn set_confidence_threshold(&self, threshold: f32) -> Result<()> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Validation(format!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        let mut state = self.write();
        state.confidence_threshold = threshold;
        tracing::info!(threshold = threshold, "Confidence threshold updated");
        Ok(())
    }

    // ========================================
    // Reads
    // ========================================

    /// Immutable snapshot of everything
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.read();
        StoreSnapshot {
            cameras: state.cameras.clone(),
            camera_status: state
                .camera_status
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            detections: state
                .detections
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            metrics: state.metrics.clone(),
            alerts: state.alerts.latest(state.alerts.capacity()),
            zones: state.zones.clone(),
            connectivity: state.connectivity.clone(),
            confidence_threshold: state.confidence_threshold,
            taken_at: Utc::now(),
        }
    }

    pub fn cameras(&self) -> Vec<CameraSource> {
        self.read().cameras.clone()
    }

    pub fn camera_status(&self, camera_id: &str) -> Option<ConnectionStatus> {
        self.read().camera_status.get(camera_id).copied()
    }

    pub fn camera_detections(&self, camera_id: &str) -> Option<CameraDetections> {
        self.read().detections.get(camera_id).cloned()
    }

    pub fn metrics(&self) -> Metrics {
        self.read().metrics.clone()
    }

    /// Latest alerts, newest first
    pub fn alerts(&self, count: usize) -> Vec<Alert> {
        self.read().alerts.latest(count)
    }

    pub fn alerts_for_camera(&self, camera_id: &str, count: usize) -> Vec<Alert> {
        self.read().alerts.by_camera(camera_id, count)
    }

    pub fn alert_count(&self) -> usize {
        self.read().alerts.len()
    }

    pub fn zones(&self) -> Vec<Zone> {
        self.read().zones.clone()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.read().connectivity.clone()
    }

    // ========================================
    // Internal
    // ========================================

    fn apply_detection(
        &self,
        camera_id: &str,
        detections: Vec<DetectionBox>,
        safety: SafetySummary,
        latency_ms: Option<f64>,
        source: UpdateSource,
    ) -> usize {
        let mut state = self.write();

        state
            .metrics
            .apply(&MetricsPatch::from_safety(&safety, latency_ms));

        let mut appended = 0;
        if safety.has_violations {
            for violation in &safety.violations {
                Self::append_alert(
                    &mut state,
                    Alert::new(AlertSeverity::Warning, violation.clone(), camera_id, None),
                );
                appended += 1;
            }
        }

        tracing::debug!(
            camera_id = %camera_id,
            source = ?source,
            detections = detections.len(),
            violations = safety.violation_count,
            alerts = appended,
            "Detection result applied"
        );

        state.detections.insert(
            camera_id.to_string(),
            CameraDetections {
                detections,
                safety,
                latency_ms,
                source,
                updated_at: Utc::now(),
            },
        );

        appended
    }

    fn append_alert(state: &mut StoreState, alert: Alert) {
        if let Some(evicted) = state.alerts.push(alert) {
            tracing::trace!(alert_id = %evicted.id, "Oldest alert evicted");
        }
    }
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY, DEFAULT_CONFIDENCE_THRESHOLD)
    }
}
