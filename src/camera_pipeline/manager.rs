//! PipelineManager - one pipeline per discovered camera
//!
//! Reconciles the running pipelines against the camera list published by the
//! registry: new cameras are started, vanished ones are torn down and their
//! per-camera store state dropped, and cameras whose stream locator changed
//! are restarted.

use super::{CameraPipeline, PipelineContext, RenderedFrame};
use crate::models::{CameraSource, ConnectionStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.restarted.is_empty()
    }
}

/// Owns every running camera pipeline
pub struct PipelineManager {
    ctx: PipelineContext,
    pipelines: RwLock<HashMap<String, Arc<CameraPipeline>>>,
}

impl PipelineManager {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Bring running pipelines in line with `cameras`
    pub async fn reconcile(&self, cameras: &[CameraSource]) -> ReconcileReport {
        let mut pipelines = self.pipelines.write().await;
        let mut report = ReconcileReport::default();

        let removed: Vec<String> = pipelines
            .keys()
            .filter(|id| !cameras.iter().any(|c| &c.id == *id))
            .cloned()
            .collect();
        for id in removed {
            if let Some(pipeline) = pipelines.remove(&id) {
                pipeline.stop();
            }
            self.ctx.store.forget_camera(&id);
            report.stopped.push(id);
        }

        for camera in cameras {
            match pipelines.get(&camera.id) {
                Some(existing) if existing.camera() == camera => continue,
                Some(existing) => {
                    existing.stop();
                    self.ctx.store.forget_camera(&camera.id);
                    report.restarted.push(camera.id.clone());
                }
                None => report.started.push(camera.id.clone()),
            }

            let pipeline = Arc::new(CameraPipeline::new(camera.clone(), self.ctx.clone()));
            pipeline.start();
            pipelines.insert(camera.id.clone(), pipeline);
        }

        if !report.is_empty() {
            tracing::info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                restarted = report.restarted.len(),
                running = pipelines.len(),
                "Camera pipelines reconciled"
            );
        }
        report
    }

    pub async fn get(&self, camera_id: &str) -> Option<Arc<CameraPipeline>> {
        self.pipelines.read().await.get(camera_id).cloned()
    }

    pub async fn latest_frame(&self, camera_id: &str) -> Option<Arc<RenderedFrame>> {
        self.get(camera_id).await.and_then(|p| p.latest_frame())
    }

    /// Connection status of every running pipeline
    pub async fn statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.pipelines
            .read()
            .await
            .iter()
            .map(|(id, p)| (id.clone(), p.status()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.pipelines.read().await.len()
    }

    /// Tear down every pipeline
    pub async fn stop_all(&self) {
        let mut pipelines = self.pipelines.write().await;
        for (id, pipeline) in pipelines.drain() {
            pipeline.stop();
            self.ctx.store.forget_camera(&id);
        }
        tracing::info!("All camera pipelines stopped");
    }
}
