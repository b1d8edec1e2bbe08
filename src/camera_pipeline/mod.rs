//! CameraPipeline - Per-Camera Capture/Infer and Render Loops
//!
//! ## Responsibilities
//!
//! - Attach to the camera stream (`Connecting` → `Connected` | `Error`)
//! - Infer loop: fixed interval, at most one outstanding request per camera
//! - Render loop: draw the latest frame with the last known detections
//! - Publish per-camera results to the aggregate store
//!
//! ## Lifecycle
//!
//! `start()` bumps the epoch and spawns the pipeline task; `stop()` bumps the
//! epoch again, aborts the loops and any in-flight request, and releases the
//! stream handle. Every post-await mutation checks the epoch first, so a
//! response that lands after `stop()` is discarded. Stream attach is never
//! retried; a failed camera stays in `Error` until it is torn down.

mod manager;

pub use manager::{PipelineManager, ReconcileReport};

use crate::ai_client::{encode_jpeg, Detector, DEFAULT_JPEG_QUALITY};
use crate::error::{Error, Result};
use crate::frame_source::{to_working_resolution, FrameSource, StreamHandle};
use crate::geometry::Resolution;
use crate::models::{CameraRuntimeState, CameraSource, ConnectionStatus, InferenceOutcome};
use crate::overlay::{compose_overlay, Overlay, OverlayRenderer};
use crate::store::AggregateStore;
use chrono::{DateTime, Utc};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Pipeline timing and resolution settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Infer loop period
    pub infer_interval: Duration,
    /// Render loop period (one display refresh)
    pub render_interval: Duration,
    /// Resolution frames are submitted to inference at
    pub working: Resolution,
    /// Display resolution; `None` draws at the stream's native size
    pub display: Option<Resolution>,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            infer_interval: Duration::from_millis(1000),
            render_interval: Duration::from_millis(33),
            working: Resolution::new(640.0, 360.0),
            display: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// A frame with its overlay drawn, ready for display
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub image: Arc<RgbImage>,
    pub overlay: Overlay,
    pub rendered_at: DateTime<Utc>,
}

/// Collaborators shared by every pipeline
#[derive(Clone)]
pub struct PipelineContext {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn Detector>,
    pub store: Arc<AggregateStore>,
    pub renderer: Arc<OverlayRenderer>,
    pub config: PipelineConfig,
}

struct Shared {
    camera: CameraSource,
    ctx: PipelineContext,
    epoch: AtomicU64,
    in_flight: AtomicBool,
    requests_sent: AtomicU64,
    /// Bumped on every applied inference result
    revision: AtomicU64,
    runtime: Mutex<CameraRuntimeState>,
    handle: Mutex<Option<Arc<dyn StreamHandle>>>,
    tasks: Mutex<Vec<AbortHandle>>,
    request: Mutex<Option<AbortHandle>>,
    frames: watch::Sender<Option<Arc<RenderedFrame>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Capture/infer and render loops for one camera
pub struct CameraPipeline {
    shared: Arc<Shared>,
    running: AtomicBool,
}

impl CameraPipeline {
    /// Create a stopped pipeline
    pub fn new(camera: CameraSource, ctx: PipelineContext) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                camera,
                ctx,
                epoch: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                requests_sent: AtomicU64::new(0),
                revision: AtomicU64::new(0),
                runtime: Mutex::new(CameraRuntimeState::default()),
                handle: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                request: Mutex::new(None),
                frames,
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Start both loops; a no-op if already running
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(camera_id = %self.shared.camera.id, "Pipeline already running");
            return;
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.in_flight.store(false, Ordering::SeqCst);
        *lock(&self.shared.runtime) = CameraRuntimeState::default();

        tracing::info!(
            camera_id = %self.shared.camera.id,
            epoch = epoch,
            "Starting camera pipeline"
        );

        let shared = self.shared.clone();
        let task = tokio::spawn(async move { Shared::run(shared, epoch).await });
        lock(&self.shared.tasks).push(task.abort_handle());
    }

    /// Cancel both loops and release the stream; safe to call repeatedly
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        for task in lock(&self.shared.tasks).drain(..) {
            task.abort();
        }
        if let Some(request) = lock(&self.shared.request).take() {
            request.abort();
        }
        if let Some(handle) = lock(&self.shared.handle).take() {
            handle.release();
        }
        self.shared.in_flight.store(false, Ordering::SeqCst);

        if was_running {
            tracing::info!(camera_id = %self.shared.camera.id, "Camera pipeline stopped");
        }
    }

    pub fn camera(&self) -> &CameraSource {
        &self.shared.camera
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.shared.runtime).connection_status
    }

    /// Copy of this camera's private runtime state
    pub fn runtime_state(&self) -> CameraRuntimeState {
        lock(&self.shared.runtime).clone()
    }

    /// Number of inference requests handed to the detector since creation
    pub fn requests_sent(&self) -> u64 {
        self.shared.requests_sent.load(Ordering::SeqCst)
    }

    /// Most recently rendered frame
    pub fn latest_frame(&self) -> Option<Arc<RenderedFrame>> {
        self.shared.frames.borrow().clone()
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_status(&self, status: ConnectionStatus) {
        lock(&self.runtime).connection_status = status;
        self.ctx.store.set_camera_status(&self.camera.id, status);
    }

    async fn run(self: Arc<Self>, epoch: u64) {
        self.set_status(ConnectionStatus::Connecting);

        let attached = self.ctx.source.attach(&self.camera).await;
        if !self.is_current(epoch) {
            if let Ok(handle) = attached {
                handle.release();
            }
            return;
        }

        let handle = match attached {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    camera_id = %self.camera.id,
                    error = %e,
                    "Stream attach failed"
                );
                self.set_status(ConnectionStatus::Error);
                return;
            }
        };

        *lock(&self.handle) = Some(handle.clone());
        self.set_status(ConnectionStatus::Connected);

        let mut infer_tick = interval(self.ctx.config.infer_interval);
        infer_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut render_tick = interval(self.ctx.config.render_interval);
        render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_drawn: Option<(Arc<RgbImage>, u64)> = None;

        while self.is_current(epoch) {
            tokio::select! {
                _ = infer_tick.tick() => self.on_infer_tick(&handle, epoch),
                _ = render_tick.tick() => self.render(&handle, &mut last_drawn),
            }
        }
    }

    fn on_infer_tick(self: &Arc<Self>, handle: &Arc<dyn StreamHandle>, epoch: u64) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::trace!(camera_id = %self.camera.id, "Inference in flight, tick skipped");
            return;
        }
        lock(&self.runtime).in_flight = true;

        let shared = self.clone();
        let handle = handle.clone();
        let task = tokio::spawn(async move { shared.infer_once(handle, epoch).await });
        *lock(&self.request) = Some(task.abort_handle());
    }

    async fn infer_once(self: Arc<Self>, handle: Arc<dyn StreamHandle>, epoch: u64) {
        let result = self.capture_and_detect(&handle).await;

        if !self.is_current(epoch) {
            tracing::debug!(camera_id = %self.camera.id, "Discarding result from stopped pipeline");
            return;
        }

        match result {
            Ok(outcome) => self.apply(&outcome),
            Err(Error::CaptureUnavailable(reason)) => {
                tracing::debug!(camera_id = %self.camera.id, reason = %reason, "Capture skipped");
            }
            Err(e) => {
                tracing::warn!(camera_id = %self.camera.id, error = %e, "Inference failed");
            }
        }

        lock(&self.runtime).in_flight = false;
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn capture_and_detect(&self, handle: &Arc<dyn StreamHandle>) -> Result<InferenceOutcome> {
        let frame = handle.capture().await?;
        let working = to_working_resolution(&frame, self.ctx.config.working);
        let jpeg = encode_jpeg(&working, self.ctx.config.jpeg_quality)?;
        let confidence = self.ctx.store.confidence_threshold();

        self.requests_sent.fetch_add(1, Ordering::SeqCst);
        self.ctx.detector.detect(jpeg, confidence).await
    }

    fn apply(&self, outcome: &InferenceOutcome) {
        {
            let mut runtime = lock(&self.runtime);
            runtime.last_detections = outcome.detections.clone();
            runtime.last_safety = outcome.safety.clone();
            runtime.last_latency_ms = outcome.latency_ms;
        }
        self.revision.fetch_add(1, Ordering::SeqCst);

        let alerts = self.ctx.store.record_pipeline_result(&self.camera.id, outcome);
        tracing::debug!(
            camera_id = %self.camera.id,
            detections = outcome.detections.len(),
            violations = outcome.safety.violation_count,
            latency_ms = outcome.latency_ms,
            alerts = alerts,
            "Inference applied"
        );
    }

    /// Draw one display frame; skipped while the stream has no valid frame
    ///
    /// `last_drawn` holds the last drawn source frame itself, so its
    /// allocation stays alive and a replacement frame never compares equal.
    fn render(
        &self,
        handle: &Arc<dyn StreamHandle>,
        last_drawn: &mut Option<(Arc<RgbImage>, u64)>,
    ) {
        let Some(frame) = handle.current_frame() else {
            return;
        };
        if frame.width() == 0 || frame.height() == 0 {
            return;
        }

        let revision = self.revision.load(Ordering::SeqCst);
        if let Some((drawn, drawn_revision)) = last_drawn.as_ref() {
            if Arc::ptr_eq(drawn, &frame) && *drawn_revision == revision {
                return;
            }
        }

        let display = self
            .ctx
            .config
            .display
            .unwrap_or_else(|| Resolution::from_pixels(frame.width(), frame.height()));
        let (detections, latency) = {
            let runtime = lock(&self.runtime);
            let latency = (runtime.last_latency_ms > 0.0).then_some(runtime.last_latency_ms);
            (runtime.last_detections.clone(), latency)
        };

        let overlay =
            match compose_overlay(&detections, latency, self.ctx.config.working, display) {
                Ok(overlay) => overlay,
                Err(e) => {
                    tracing::debug!(camera_id = %self.camera.id, error = %e, "Frame skipped");
                    return;
                }
            };

        let (w, h) = display.pixels();
        let mut canvas = if frame.width() == w && frame.height() == h {
            frame.as_ref().clone()
        } else {
            imageops::resize(frame.as_ref(), w, h, FilterType::Triangle)
        };
        self.ctx.renderer.draw(&mut canvas, &overlay);
        *last_drawn = Some((frame, revision));

        self.frames.send_replace(Some(Arc::new(RenderedFrame {
            image: Arc::new(canvas),
            overlay,
            rendered_at: Utc::now(),
        })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertSeverity, BoundingBox, DetectionBox, SafetySummary};
    use async_trait::async_trait;

    struct FakeHandle {
        frame: Mutex<Option<Arc<RgbImage>>>,
        capture_ok: bool,
        released: AtomicBool,
    }

    impl FakeHandle {
        /// Drop the current frame before allocating its replacement
        fn replace_frame(&self, next: RgbImage) {
            let mut slot = lock(&self.frame);
            *slot = None;
            *slot = Some(Arc::new(next));
        }
    }

    #[async_trait]
    impl StreamHandle for FakeHandle {
        async fn capture(&self) -> Result<RgbImage> {
            match (self.current_frame(), self.capture_ok) {
                (Some(frame), true) => Ok(frame.as_ref().clone()),
                _ => Err(Error::CaptureUnavailable("not ready".to_string())),
            }
        }

        fn current_frame(&self) -> Option<Arc<RgbImage>> {
            lock(&self.frame).clone()
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct FakeSource {
        handle: Option<Arc<FakeHandle>>,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        async fn attach(&self, camera: &CameraSource) -> Result<Arc<dyn StreamHandle>> {
            match &self.handle {
                Some(h) => Ok(h.clone()),
                None => Err(Error::StreamAttach {
                    camera_id: camera.id.clone(),
                    message: "no such stream".to_string(),
                }),
            }
        }
    }

    struct FakeDetector {
        latency: Duration,
        fail: bool,
        calls: AtomicU64,
    }

    #[async_trait]
    impl Detector for FakeDetector {
        async fn detect(&self, _frame: Vec<u8>, _confidence: f32) -> Result<InferenceOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            if self.fail {
                return Err(Error::Inference {
                    status: Some(503),
                    message: "unavailable".to_string(),
                });
            }
            Ok(InferenceOutcome {
                detections: vec![DetectionBox {
                    class_id: 1,
                    class_name: "NO-Hardhat".to_string(),
                    confidence: 0.9,
                    bbox: BoundingBox::new(8.0, 4.0, 16.0, 12.0),
                }],
                safety: SafetySummary {
                    people_count: 1,
                    violation_count: 1,
                    compliance_rate: 0.0,
                    has_violations: true,
                    violations: vec!["NO-Hardhat".to_string()],
                },
                latency_ms: 25.0,
                server_processing_ms: 20.0,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn handle(ready: bool, capture_ok: bool) -> Arc<FakeHandle> {
        Arc::new(FakeHandle {
            frame: Mutex::new(ready.then(|| Arc::new(RgbImage::new(128, 72)))),
            capture_ok,
            released: AtomicBool::new(false),
        })
    }

    fn detector(latency_ms: u64, fail: bool) -> Arc<FakeDetector> {
        Arc::new(FakeDetector {
            latency: Duration::from_millis(latency_ms),
            fail,
            calls: AtomicU64::new(0),
        })
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            infer_interval: Duration::from_millis(100),
            render_interval: Duration::from_millis(20),
            working: Resolution::new(64.0, 36.0),
            display: None,
            jpeg_quality: 70,
        }
    }

    fn pipeline(
        handle: Option<Arc<FakeHandle>>,
        detector: Arc<FakeDetector>,
        store: Arc<AggregateStore>,
    ) -> CameraPipeline {
        pipeline_with(handle, detector, store, config())
    }

    fn pipeline_with(
        handle: Option<Arc<FakeHandle>>,
        detector: Arc<FakeDetector>,
        store: Arc<AggregateStore>,
        config: PipelineConfig,
    ) -> CameraPipeline {
        let ctx = PipelineContext {
            source: Arc::new(FakeSource { handle }),
            detector,
            store,
            renderer: Arc::new(OverlayRenderer::new()),
            config,
        };
        CameraPipeline::new(
            CameraSource {
                id: "cam-1".to_string(),
                display_name: "Dock".to_string(),
                stream_locator: "/videos/dock.mp4".to_string(),
            },
            ctx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_appends_one_warning() {
        let store = Arc::new(AggregateStore::default());
        let p = pipeline(Some(handle(true, true)), detector(10, false), store.clone());
        p.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(p.status(), ConnectionStatus::Connected);
        let alerts = store.alerts(10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "NO-Hardhat");
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].camera_id, "cam-1");
        p.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_inference_limits_requests() {
        let store = Arc::new(AggregateStore::default());
        let det = detector(350, false);
        let p = pipeline(Some(handle(true, true)), det.clone(), store);
        p.start();
        tokio::time::sleep(Duration::from_millis(1050)).await;

        // ceil(1050 / 350) = 3, not ceil(1050 / 100) = 11
        let sent = det.calls.load(Ordering::SeqCst);
        assert!(sent <= 3, "sent {} requests", sent);
        assert!(sent >= 2);
        assert_eq!(p.requests_sent(), sent);
        p.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_failure_is_terminal() {
        let store = Arc::new(AggregateStore::default());
        let det = detector(10, false);
        let p = pipeline(None, det.clone(), store.clone());
        p.start();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(p.status(), ConnectionStatus::Error);
        assert_eq!(store.camera_status("cam-1"), Some(ConnectionStatus::Error));
        assert_eq!(det.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_failure_keeps_connection() {
        let store = Arc::new(AggregateStore::default());
        let det = detector(10, true);
        let p = pipeline(Some(handle(true, true)), det.clone(), store.clone());
        p.start();
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(p.status(), ConnectionStatus::Connected);
        assert!(!p.runtime_state().in_flight);
        // Guard clears after failures, so later ticks keep sending
        assert!(det.calls.load(Ordering::SeqCst) >= 4);
        assert_eq!(store.alert_count(), 0);
        p.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_is_skipped() {
        let store = Arc::new(AggregateStore::default());
        let det = detector(10, false);
        let p = pipeline(Some(handle(true, false)), det.clone(), store);
        p.start();
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(p.status(), ConnectionStatus::Connected);
        assert_eq!(det.calls.load(Ordering::SeqCst), 0);
        p.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_stop_is_discarded() {
        let store = Arc::new(AggregateStore::default());
        let h = handle(true, true);
        let p = pipeline(Some(h.clone()), detector(500, false), store.clone());
        p.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(p.runtime_state().in_flight);

        p.stop();
        p.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(store.camera_detections("cam-1").is_none());
        assert_eq!(store.alert_count(), 0);
        assert!(h.released.load(Ordering::SeqCst));
        assert!(!p.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_draws_rescaled_boxes() {
        let store = Arc::new(AggregateStore::default());
        let p = pipeline(Some(handle(true, true)), detector(10, false), store);
        p.start();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let frame = p.latest_frame().expect("frame rendered");
        assert_eq!(frame.image.dimensions(), (128, 72));
        assert_eq!(frame.overlay.boxes.len(), 1);
        // Working 64x36 -> display 128x72
        assert_eq!(frame.overlay.boxes[0].rect, BoundingBox::new(16.0, 8.0, 32.0, 24.0));
        assert_eq!(frame.overlay.latency_label.as_deref(), Some("25ms"));
        p.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_skips_stream_without_frame() {
        let store = Arc::new(AggregateStore::default());
        let p = pipeline(Some(handle(false, false)), detector(10, false), store);
        p.start();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(p.latest_frame().is_none());
        assert_eq!(p.status(), ConnectionStatus::Connected);
        p.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_picks_up_replaced_frame() {
        let store = Arc::new(AggregateStore::default());
        let h = handle(true, true);
        h.replace_frame(RgbImage::from_pixel(128, 72, image::Rgb([10, 10, 10])));
        // Failing inference keeps the detection revision fixed
        let p = pipeline(Some(h.clone()), detector(10, true), store);
        p.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = p.latest_frame().expect("first frame rendered");
        assert_eq!(first.image.get_pixel(120, 64).0, [10, 10, 10]);

        h.replace_frame(RgbImage::from_pixel(128, 72, image::Rgb([200, 200, 200])));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let latest = p.latest_frame().expect("frame rendered");
        assert_eq!(latest.image.get_pixel(120, 64).0, [200, 200, 200]);
        p.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_display_skips_frame_only() {
        let store = Arc::new(AggregateStore::default());
        let cfg = PipelineConfig {
            display: Some(Resolution::new(0.0, 0.0)),
            ..config()
        };
        let det = detector(10, false);
        let p = pipeline_with(Some(handle(true, true)), det.clone(), store.clone(), cfg);
        p.start();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(p.latest_frame().is_none());
        assert_eq!(p.status(), ConnectionStatus::Connected);
        assert_eq!(store.camera_status("cam-1"), Some(ConnectionStatus::Connected));
        // Inference is unaffected by the draw failure
        assert!(det.calls.load(Ordering::SeqCst) >= 2);
        p.stop();
    }
}
