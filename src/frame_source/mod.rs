//! FrameSource - Platform Frame Acquisition
//!
//! Frame acquisition is a black box to the rest of the client: a source
//! attaches to a camera's stream locator and hands back a `StreamHandle` that
//! produces raw RGB frames. Decoding live video is out of scope; the bundled
//! `HttpSnapshotSource` pulls JPEG/PNG snapshots from an HTTP endpoint.
//!
//! Discovery locators that name a video (e.g. `/videos/dock.mp4`) are mapped
//! to a snapshot endpoint through a URL template such as
//! `http://go2rtc:1984/api/frame.jpeg?src={id}`.

use crate::error::{Error, Result};
use crate::geometry::Resolution;
use crate::models::CameraSource;
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;
use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Attaches to camera streams
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Attach to the camera's stream; failure is fatal to that camera's pipeline
    async fn attach(&self, camera: &CameraSource) -> Result<Arc<dyn StreamHandle>>;
}

/// A live, attached stream
#[async_trait]
pub trait StreamHandle: Send + Sync {
    /// Grab the current frame at native resolution
    ///
    /// Returns `Error::CaptureUnavailable` when the stream has no frame ready.
    async fn capture(&self) -> Result<RgbImage>;

    /// Most recent frame for display, `None` while the stream is not ready
    fn current_frame(&self) -> Option<Arc<RgbImage>>;

    /// Release the underlying stream; further captures fail
    fn release(&self);
}

/// Resize a frame to the working resolution used for inference
pub fn to_working_resolution(frame: &RgbImage, working: Resolution) -> RgbImage {
    let (w, h) = working.pixels();
    if frame.width() == w && frame.height() == h {
        return frame.clone();
    }
    imageops::resize(frame, w, h, FilterType::Triangle)
}

/// Snapshot-over-HTTP frame source
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: Option<Url>,
    template: Option<String>,
}

impl HttpSnapshotSource {
    /// Create new source; relative locators are resolved against `base_url`
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = match base_url {
            Some(raw) => Some(
                Url::parse(raw)
                    .map_err(|e| Error::Config(format!("invalid stream base URL {}: {}", raw, e)))?,
            ),
            None => None,
        };
        Ok(Self {
            client,
            base_url,
            template: None,
        })
    }

    /// Map every camera through a snapshot URL template
    ///
    /// `{id}` and `{locator}` are replaced with the URL-encoded camera id and
    /// stream locator.
    pub fn with_template(mut self, template: Option<String>) -> Self {
        self.template = template.filter(|t| !t.trim().is_empty());
        self
    }

    /// Snapshot URL for a camera
    pub fn resolve(&self, camera: &CameraSource) -> std::result::Result<Url, String> {
        let target = match &self.template {
            Some(template) => template
                .replace("{id}", &urlencoding::encode(&camera.id))
                .replace("{locator}", &urlencoding::encode(&camera.stream_locator)),
            None => camera.stream_locator.clone(),
        };

        match Url::parse(&target) {
            Ok(url) => Ok(url),
            Err(_) => match &self.base_url {
                Some(base) => base.join(&target).map_err(|e| e.to_string()),
                None => Err(format!("relative locator {} without a base URL", target)),
            },
        }
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    async fn attach(&self, camera: &CameraSource) -> Result<Arc<dyn StreamHandle>> {
        let url = self
            .resolve(camera)
            .map_err(|message| Error::StreamAttach {
                camera_id: camera.id.clone(),
                message,
            })?;

        let handle = HttpSnapshotHandle {
            client: self.client.clone(),
            url,
            latest: RwLock::new(None),
            released: AtomicBool::new(false),
        };

        // First frame proves the locator is usable
        handle
            .capture()
            .await
            .map_err(|e| Error::StreamAttach {
                camera_id: camera.id.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(camera_id = %camera.id, url = %handle.url, "Snapshot stream attached");
        Ok(Arc::new(handle))
    }
}

struct HttpSnapshotHandle {
    client: reqwest::Client,
    url: Url,
    latest: RwLock<Option<Arc<RgbImage>>>,
    released: AtomicBool,
}

#[async_trait]
impl StreamHandle for HttpSnapshotHandle {
    async fn capture(&self) -> Result<RgbImage> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::CaptureUnavailable("stream released".to_string()));
        }

        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::CaptureUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::CaptureUnavailable(format!(
                "snapshot endpoint returned {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::CaptureUnavailable(e.to_string()))?;
        let frame = image::load_from_memory(&bytes)
            .map_err(|e| Error::CaptureUnavailable(format!("undecodable snapshot: {}", e)))?
            .to_rgb8();

        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(Arc::new(frame.clone()));
        }
        Ok(frame)
    }

    fn current_frame(&self) -> Option<Arc<RgbImage>> {
        if self.released.load(Ordering::Acquire) {
            return None;
        }
        self.latest.read().ok().and_then(|latest| latest.clone())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            if let Ok(mut latest) = self.latest.write() {
                *latest = None;
            }
            tracing::debug!(url = %self.url, "Snapshot stream released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_resize_to_working_resolution() {
        let frame = RgbImage::from_pixel(1280, 720, Rgb([1, 2, 3]));
        let working = to_working_resolution(&frame, Resolution::new(640.0, 360.0));
        assert_eq!((working.width(), working.height()), (640, 360));

        let same = to_working_resolution(&working, Resolution::new(640.0, 360.0));
        assert_eq!((same.width(), same.height()), (640, 360));
    }

    fn camera(id: &str, locator: &str) -> CameraSource {
        CameraSource {
            id: id.to_string(),
            display_name: "Main Entrance".to_string(),
            stream_locator: locator.to_string(),
        }
    }

    #[test]
    fn test_resolve_locators() {
        let source =
            HttpSnapshotSource::new(Some("http://localhost:3002"), Duration::from_secs(1)).unwrap();
        assert_eq!(
            source.resolve(&camera("cam-1", "/videos/cam1.jpg")).unwrap().as_str(),
            "http://localhost:3002/videos/cam1.jpg"
        );
        assert_eq!(
            source
                .resolve(&camera("cam-1", "http://10.0.0.5:1984/api/frame.jpeg?src=cam-1"))
                .unwrap()
                .as_str(),
            "http://10.0.0.5:1984/api/frame.jpeg?src=cam-1"
        );

        let bare = HttpSnapshotSource::new(None, Duration::from_secs(1)).unwrap();
        assert!(bare.resolve(&camera("cam-1", "/videos/cam1.jpg")).is_err());
    }

    #[test]
    fn test_template_maps_video_locators() {
        let source = HttpSnapshotSource::new(Some("http://localhost:3002"), Duration::from_secs(1))
            .unwrap()
            .with_template(Some("http://10.0.0.5:1984/api/frame.jpeg?src={id}".to_string()));
        assert_eq!(
            source.resolve(&camera("cam 1", "/videos/dock.mp4")).unwrap().as_str(),
            "http://10.0.0.5:1984/api/frame.jpeg?src=cam%201"
        );

        // Relative templates still resolve against the base URL
        let source = HttpSnapshotSource::new(Some("http://localhost:3002"), Duration::from_secs(1))
            .unwrap()
            .with_template(Some("/snapshot?video={locator}".to_string()));
        assert_eq!(
            source.resolve(&camera("cam-1", "/videos/dock.mp4")).unwrap().as_str(),
            "http://localhost:3002/snapshot?video=%2Fvideos%2Fdock.mp4"
        );

        // Blank template falls back to the raw locator
        let source = HttpSnapshotSource::new(Some("http://localhost:3002"), Duration::from_secs(1))
            .unwrap()
            .with_template(Some("  ".to_string()));
        assert_eq!(
            source.resolve(&camera("cam-1", "/videos/cam1.jpg")).unwrap().as_str(),
            "http://localhost:3002/videos/cam1.jpg"
        );
    }

    #[tokio::test]
    async fn test_attach_failure_is_stream_attach_error() {
        let source =
            HttpSnapshotSource::new(Some("http://127.0.0.1:9"), Duration::from_millis(300)).unwrap();
        let err = source
            .attach(&camera("cam-1", "/videos/cam1.jpg"))
            .await
            .err()
            .expect("attach must fail");
        assert!(matches!(err, Error::StreamAttach { ref camera_id, .. } if camera_id == "cam-1"));
    }
}
