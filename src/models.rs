//! Shared data model
//!
//! Wire types for the inference service and discovery service decode straight
//! into these structs. `SafetySummary` re-derives its violation flag on every
//! decode so the `has_violations == (violation_count > 0)` invariant holds no
//! matter what the producer sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Class names with this prefix denote missing equipment (e.g. `NO-Hardhat`)
pub const VIOLATION_CLASS_PREFIX: &str = "NO-";

/// Class name the inference model uses for people
pub const PERSON_CLASS: &str = "Person";

/// Whether a detection class represents a safety violation
pub fn is_violation_class(class_name: &str) -> bool {
    class_name.starts_with(VIOLATION_CLASS_PREFIX)
}

// ========================================
// Cameras
// ========================================

/// A camera stream source reported by the discovery service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSource {
    pub id: String,
    pub display_name: String,
    pub stream_locator: String,
}

/// Entry of `GET /api/videos`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
}

impl From<VideoEntry> for CameraSource {
    fn from(entry: VideoEntry) -> Self {
        Self {
            id: entry.id,
            display_name: entry.name,
            stream_locator: entry.url,
        }
    }
}

/// Body of `GET /api/videos` and of each watch-stream event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoListing {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub videos: Vec<VideoEntry>,
}

impl VideoListing {
    /// Convert into camera sources, dropping duplicate ids (first wins)
    pub fn into_cameras(self) -> Vec<CameraSource> {
        let mut cameras: Vec<CameraSource> = Vec::with_capacity(self.videos.len());
        for entry in self.videos {
            if cameras.iter().any(|c| c.id == entry.id) {
                tracing::warn!(camera_id = %entry.id, "Duplicate camera id in listing, ignoring");
                continue;
            }
            cameras.push(entry.into());
        }
        cameras
    }
}

/// Per-camera connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Error,
}

// ========================================
// Detections
// ========================================

/// Axis-aligned box `(x1, y1, x2, y2)`, serialized as a 4-element array
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One detected object, in working-resolution pixel units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    #[serde(default)]
    pub class_id: i32,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectionBox {
    pub fn is_violation(&self) -> bool {
        is_violation_class(&self.class_name)
    }
}

/// Safety summary for one detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SafetyCheckWire")]
pub struct SafetySummary {
    pub people_count: u32,
    pub violation_count: u32,
    pub compliance_rate: f32,
    pub violations: Vec<String>,
    pub has_violations: bool,
}

impl Default for SafetySummary {
    fn default() -> Self {
        Self {
            people_count: 0,
            violation_count: 0,
            compliance_rate: 100.0,
            violations: Vec::new(),
            has_violations: false,
        }
    }
}

impl SafetySummary {
    /// Derive a summary from raw detections (used when a producer omits `safety_check`)
    pub fn from_detections(detections: &[DetectionBox]) -> Self {
        let people = detections
            .iter()
            .filter(|d| d.class_name == PERSON_CLASS)
            .count() as i64;
        let violations: Vec<String> = detections
            .iter()
            .filter(|d| d.is_violation())
            .map(|d| d.class_name.clone())
            .collect();

        SafetyCheckWire {
            people_count: people,
            violation_count: violations.len() as i64,
            compliance_rate: None,
            has_violations: None,
            violations,
        }
        .into()
    }
}

/// `safety_check` as sent by the inference service; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
struct SafetyCheckWire {
    #[serde(default)]
    people_count: i64,
    #[serde(default)]
    violation_count: i64,
    #[serde(default)]
    compliance_rate: Option<f32>,
    #[serde(default)]
    has_violations: Option<bool>,
    #[serde(default)]
    violations: Vec<String>,
}

impl From<SafetyCheckWire> for SafetySummary {
    fn from(wire: SafetyCheckWire) -> Self {
        let people_count = wire.people_count.clamp(0, u32::MAX as i64) as u32;
        let violation_count = (wire.violation_count.clamp(0, u32::MAX as i64) as u32)
            .max(wire.violations.len() as u32);
        let has_violations = violation_count > 0;

        if let Some(reported) = wire.has_violations {
            if reported != has_violations {
                tracing::warn!(
                    reported = reported,
                    violation_count = violation_count,
                    "has_violations disagrees with violation count, recomputed"
                );
            }
        }

        let compliance_rate = match wire.compliance_rate.filter(|r| r.is_finite()) {
            Some(rate) => rate.clamp(0.0, 100.0),
            None if people_count == 0 => 100.0,
            None => {
                let compliant = people_count.saturating_sub(violation_count) as f32;
                (compliant / people_count as f32 * 100.0).clamp(0.0, 100.0)
            }
        };

        Self {
            people_count,
            violation_count,
            compliance_rate,
            violations: wire.violations,
            has_violations,
        }
    }
}

/// Body of `POST /detect` and `data` of a push `detection` message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub detections: Vec<DetectionBox>,
    #[serde(default)]
    pub safety_check: Option<SafetySummary>,
    #[serde(default)]
    pub processing_time_ms: f64,
}

impl DetectionResult {
    /// Safety summary, derived from detections when the producer omitted it
    pub fn safety(&self) -> SafetySummary {
        self.safety_check
            .clone()
            .unwrap_or_else(|| SafetySummary::from_detections(&self.detections))
    }
}

/// Completed inference for one frame, with client-measured latency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceOutcome {
    pub detections: Vec<DetectionBox>,
    pub safety: SafetySummary,
    /// Wall-clock round trip measured by the client
    pub latency_ms: f64,
    /// Processing time reported by the service
    pub server_processing_ms: f64,
}

/// Where a per-camera detection update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    Pipeline,
    PushChannel,
}

/// Latest detections for one camera as held by the aggregate store
#[derive(Debug, Clone, Serialize)]
pub struct CameraDetections {
    pub detections: Vec<DetectionBox>,
    pub safety: SafetySummary,
    pub latency_ms: Option<f64>,
    pub source: UpdateSource,
    pub updated_at: DateTime<Utc>,
}

/// Runtime state private to one camera pipeline
#[derive(Debug, Clone, Serialize)]
pub struct CameraRuntimeState {
    pub connection_status: ConnectionStatus,
    pub last_detections: Vec<DetectionBox>,
    pub last_safety: SafetySummary,
    pub last_latency_ms: f64,
    pub in_flight: bool,
}

impl Default for CameraRuntimeState {
    fn default() -> Self {
        Self {
            connection_status: ConnectionStatus::Connecting,
            last_detections: Vec::new(),
            last_safety: SafetySummary::default(),
            last_latency_ms: 0.0,
            in_flight: false,
        }
    }
}

// ========================================
// Alerts
// ========================================

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Danger,
}

/// Safety alert (immutable once created)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub title: String,
    pub camera_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        title: impl Into<String>,
        camera_id: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            title: title.into(),
            camera_id: camera_id.into(),
            detail,
            created_at: Utc::now(),
        }
    }
}

// ========================================
// Metrics / zones / connectivity
// ========================================

/// Aggregate metrics (most recent across all sources)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub latency_ms: f64,
    pub people_count: u32,
    pub violation_count: u32,
    pub compliance_rate: f32,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            latency_ms: 0.0,
            people_count: 0,
            violation_count: 0,
            compliance_rate: 100.0,
        }
    }
}

impl Metrics {
    /// Overwrite the fields present in `patch`
    pub fn apply(&mut self, patch: &MetricsPatch) {
        if let Some(v) = patch.latency_ms.filter(|v| v.is_finite() && *v >= 0.0) {
            self.latency_ms = v;
        }
        if let Some(v) = patch.people_count {
            self.people_count = v;
        }
        if let Some(v) = patch.violation_count {
            self.violation_count = v;
        }
        if let Some(v) = patch.compliance_rate.filter(|v| v.is_finite()) {
            self.compliance_rate = v.clamp(0.0, 100.0);
        }
    }
}

/// Partial metrics update; accepts both snake_case and camelCase keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsPatch {
    #[serde(default, alias = "latency", alias = "latencyMs")]
    pub latency_ms: Option<f64>,
    #[serde(default, alias = "peopleCount")]
    pub people_count: Option<u32>,
    #[serde(default, alias = "violationCount")]
    pub violation_count: Option<u32>,
    #[serde(default, alias = "complianceRate")]
    pub compliance_rate: Option<f32>,
}

impl MetricsPatch {
    /// Metrics delta produced by one detection result
    pub fn from_safety(safety: &SafetySummary, latency_ms: Option<f64>) -> Self {
        Self {
            latency_ms,
            people_count: Some(safety.people_count),
            violation_count: Some(safety.violation_count),
            compliance_rate: Some(safety.compliance_rate),
        }
    }
}

/// Monitored zone; fields beyond id/name are kept verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Push channel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closed,
}

/// Global connectivity indicator
#[derive(Debug, Clone, Serialize)]
pub struct Connectivity {
    pub push_channel: ChannelStatus,
    pub push_retry_count: u32,
    /// `None` until the first health poll completes
    pub inference_healthy: Option<bool>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            push_channel: ChannelStatus::Closed,
            push_retry_count: 0,
            inference_healthy: None,
            last_health_check: None,
        }
    }
}
