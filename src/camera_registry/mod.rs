//! CameraRegistry - Camera Discovery
//!
//! ## Responsibilities
//!
//! - Fetch the camera list from the discovery service (`GET /api/videos`)
//! - Follow the change stream (`GET /api/videos/watch`, server-sent events)
//! - Own the camera list in the aggregate store
//! - Notify listeners (pipeline manager, push subscription) when it changes

mod sse;

pub use sse::SseDecoder;

use crate::error::{Error, Result};
use crate::models::{CameraSource, VideoListing};
use crate::store::AggregateStore;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Discovery service client
pub struct CameraRegistry {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    store: Arc<AggregateStore>,
    cameras_tx: watch::Sender<Vec<CameraSource>>,
    retry_delay: Duration,
}

impl CameraRegistry {
    /// Create new CameraRegistry
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<AggregateStore>,
        request_timeout: Duration,
        retry_delay: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        // No overall timeout: the watch stream stays open indefinitely
        let stream_client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        let (cameras_tx, _) = watch::channel(Vec::new());

        Ok(Self {
            client,
            stream_client,
            base_url,
            store,
            cameras_tx,
            retry_delay,
        })
    }

    /// Current camera list
    pub fn cameras(&self) -> Vec<CameraSource> {
        self.cameras_tx.borrow().clone()
    }

    /// Receive every published camera list
    pub fn subscribe(&self) -> watch::Receiver<Vec<CameraSource>> {
        self.cameras_tx.subscribe()
    }

    /// Fetch the listing once
    pub async fn fetch(&self) -> Result<Vec<CameraSource>> {
        let url = format!("{}/api/videos", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "discovery service returned {}",
                response.status()
            )));
        }

        let listing: VideoListing = response.json().await?;
        Ok(listing.into_cameras())
    }

    /// Publish a camera list; returns whether it differed from the current one
    pub fn publish(&self, cameras: Vec<CameraSource>) -> bool {
        if *self.cameras_tx.borrow() == cameras {
            return false;
        }
        tracing::info!(count = cameras.len(), "Camera list changed");
        self.store.set_cameras(cameras.clone());
        self.cameras_tx.send_replace(cameras);
        true
    }

    /// Fetch and publish
    pub async fn refresh(&self) -> Result<bool> {
        let cameras = self.fetch().await?;
        Ok(self.publish(cameras))
    }

    /// Keep the camera list current until `shutdown` flips
    ///
    /// Each round fetches the full list, then follows the change stream until
    /// it ends or fails; the next round starts after `retry_delay`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.refresh().await {
                tracing::warn!(error = %e, "Camera discovery fetch failed");
            }

            tokio::select! {
                res = self.follow() => match res {
                    Ok(()) => tracing::info!("Camera watch stream ended"),
                    Err(e) => tracing::warn!(error = %e, "Camera watch stream failed"),
                },
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Camera registry stopped");
    }

    async fn follow(&self) -> Result<()> {
        let url = format!("{}/api/videos/watch", self.base_url);
        let response = self
            .stream_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!(url = %url, "Following camera watch stream");

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for payload in decoder.push(&chunk?) {
                self.handle_event(&payload);
            }
        }
        Ok(())
    }

    fn handle_event(&self, payload: &str) {
        match serde_json::from_str::<VideoListing>(payload) {
            Ok(listing) => {
                self.publish(listing.into_cameras());
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed camera watch event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(store: Arc<AggregateStore>) -> CameraRegistry {
        CameraRegistry::new(
            "http://127.0.0.1:9/",
            store,
            Duration::from_millis(200),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn cam(id: &str) -> CameraSource {
        CameraSource {
            id: id.to_string(),
            display_name: id.to_string(),
            stream_locator: format!("/videos/{}.mp4", id),
        }
    }

    #[tokio::test]
    async fn test_publish_only_on_change() {
        let store = Arc::new(AggregateStore::default());
        let reg = registry(store.clone());
        let mut rx = reg.subscribe();

        assert!(reg.publish(vec![cam("cam-1")]));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!reg.publish(vec![cam("cam-1")]));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.cameras(), vec![cam("cam-1")]);
    }

    #[tokio::test]
    async fn test_watch_event_replaces_list() {
        let store = Arc::new(AggregateStore::default());
        let reg = registry(store.clone());
        reg.publish(vec![cam("cam-1")]);

        reg.handle_event(
            r#"{"count":2,"videos":[
                {"id":"cam-1","name":"a","url":"/videos/a.mp4","size":1},
                {"id":"cam-2","name":"b","url":"/videos/b.mp4","size":2}
            ]}"#,
        );
        assert_eq!(reg.cameras().len(), 2);
        assert_eq!(store.cameras()[1].stream_locator, "/videos/b.mp4");

        reg.handle_event("not json");
        assert_eq!(reg.cameras().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_unreachable_service() {
        let reg = registry(Arc::new(AggregateStore::default()));
        assert!(reg.fetch().await.is_err());
    }
}
