//! Camera pipeline end-to-end scenarios with in-process fakes

use async_trait::async_trait;
use image::RgbImage;
use ppe_monitor::ai_client::Detector;
use ppe_monitor::camera_pipeline::{CameraPipeline, PipelineConfig, PipelineContext};
use ppe_monitor::frame_source::{FrameSource, StreamHandle};
use ppe_monitor::geometry::Resolution;
use ppe_monitor::models::{
    AlertSeverity, BoundingBox, CameraSource, ConnectionStatus, DetectionBox, InferenceOutcome,
    SafetySummary,
};
use ppe_monitor::overlay::OverlayRenderer;
use ppe_monitor::store::AggregateStore;
use ppe_monitor::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StillCamera {
    frame: Arc<RgbImage>,
}

#[async_trait]
impl StreamHandle for StillCamera {
    async fn capture(&self) -> Result<RgbImage> {
        Ok(self.frame.as_ref().clone())
    }

    fn current_frame(&self) -> Option<Arc<RgbImage>> {
        Some(self.frame.clone())
    }

    fn release(&self) {}
}

struct StillSource;

#[async_trait]
impl FrameSource for StillSource {
    async fn attach(&self, _camera: &CameraSource) -> Result<Arc<dyn StreamHandle>> {
        Ok(Arc::new(StillCamera {
            frame: Arc::new(RgbImage::new(160, 90)),
        }))
    }
}

/// Answers every request with one `NO-Hardhat` violation after `latency`
struct SlowDetector {
    latency: Duration,
    calls: AtomicU64,
}

#[async_trait]
impl Detector for SlowDetector {
    async fn detect(&self, _frame: Vec<u8>, confidence: f32) -> Result<InferenceOutcome> {
        assert!((0.0..=1.0).contains(&confidence));
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(InferenceOutcome {
            detections: vec![DetectionBox {
                class_id: 2,
                class_name: "NO-Hardhat".to_string(),
                confidence: 0.81,
                bbox: BoundingBox::new(10.0, 10.0, 40.0, 30.0),
            }],
            safety: serde_json::from_value::<SafetySummary>(serde_json::json!({
                "people_count": 1,
                "violation_count": 1,
                "compliance_rate": 0.0,
                "has_violations": true,
                "violations": ["NO-Hardhat"]
            }))
            .unwrap(),
            latency_ms: self.latency.as_millis() as f64,
            server_processing_ms: 5.0,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}

fn pipeline(
    camera_id: &str,
    infer_interval: Duration,
    detector: Arc<SlowDetector>,
    store: Arc<AggregateStore>,
) -> CameraPipeline {
    CameraPipeline::new(
        CameraSource {
            id: camera_id.to_string(),
            display_name: camera_id.to_string(),
            stream_locator: format!("/videos/{}.mp4", camera_id),
        },
        PipelineContext {
            source: Arc::new(StillSource),
            detector,
            store,
            renderer: Arc::new(OverlayRenderer::new()),
            config: PipelineConfig {
                infer_interval,
                render_interval: Duration::from_millis(33),
                working: Resolution::new(80.0, 45.0),
                display: None,
                jpeg_quality: 75,
            },
        },
    )
}

#[tokio::test(start_paused = true)]
async fn violation_result_appends_exactly_one_warning_alert() {
    let store = Arc::new(AggregateStore::default());
    let detector = Arc::new(SlowDetector {
        latency: Duration::from_millis(40),
        calls: AtomicU64::new(0),
    });
    let p = pipeline("cam-1", Duration::from_millis(1000), detector.clone(), store.clone());

    p.start();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    let alerts = store.alerts(100);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    assert_eq!(alerts[0].title, "NO-Hardhat");

    let detections = store.camera_detections("cam-1").unwrap();
    assert!(detections.safety.has_violations);
    assert_eq!(detections.latency_ms, Some(40.0));
    assert_eq!(store.metrics().violation_count, 1);
    p.stop();
}

#[tokio::test(start_paused = true)]
async fn tick_while_request_pending_sends_nothing() {
    let store = Arc::new(AggregateStore::default());
    let detector = Arc::new(SlowDetector {
        latency: Duration::from_millis(2500),
        calls: AtomicU64::new(0),
    });
    let p = pipeline("cam-2", Duration::from_millis(1000), detector.clone(), store.clone());

    p.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);

    // Ticks at 1000ms and 2000ms fire while the first request is pending
    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    assert!(p.runtime_state().in_flight);
    assert_eq!(p.status(), ConnectionStatus::Connected);
    p.stop();
}

#[tokio::test(start_paused = true)]
async fn requests_bounded_by_latency_not_interval() {
    let store = Arc::new(AggregateStore::default());
    let latency = Duration::from_millis(700);
    let detector = Arc::new(SlowDetector {
        latency,
        calls: AtomicU64::new(0),
    });
    let p = pipeline("cam-3", Duration::from_millis(200), detector.clone(), store);

    let elapsed = Duration::from_millis(5000);
    p.start();
    tokio::time::sleep(elapsed).await;
    p.stop();

    let bound = (elapsed.as_millis() as f64 / latency.as_millis() as f64).ceil() as u64;
    let sent = detector.calls.load(Ordering::SeqCst);
    assert!(sent <= bound, "sent {} > bound {}", sent, bound);
    assert!(sent < (elapsed.as_millis() / 200) as u64);
}

#[tokio::test(start_paused = true)]
async fn response_after_stop_is_not_applied() {
    let store = Arc::new(AggregateStore::default());
    let detector = Arc::new(SlowDetector {
        latency: Duration::from_millis(800),
        calls: AtomicU64::new(0),
    });
    let p = pipeline("cam-4", Duration::from_millis(1000), detector.clone(), store.clone());

    p.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    p.stop();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    assert!(store.camera_detections("cam-4").is_none());
    assert_eq!(store.alert_count(), 0);
}
