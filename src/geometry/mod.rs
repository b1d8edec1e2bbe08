//! Geometry Mapper
//!
//! Maps detection boxes from the working (inference) resolution into the
//! display resolution. Axes are scaled independently, so the display aspect
//! ratio does not have to match the working aspect ratio.

use crate::error::{Error, Result};
use crate::models::{BoundingBox, DetectionBox};
use serde::{Deserialize, Serialize};

/// Pixel dimensions of a frame or drawing surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: f32,
    pub height: f32,
}

impl Resolution {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// From integer pixel dimensions (e.g. an image buffer)
    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self::new(width as f32, height as f32)
    }

    /// Reject non-finite or non-positive dimensions
    pub fn validate(&self) -> Result<()> {
        if !self.width.is_finite() || !self.height.is_finite() {
            return Err(Error::InvalidGeometry(format!(
                "non-finite dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(Error::InvalidGeometry(format!(
                "non-positive dimensions {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Integer pixel size, rounded and at least 1x1
    pub fn pixels(&self) -> (u32, u32) {
        (
            self.width.round().max(1.0) as u32,
            self.height.round().max(1.0) as u32,
        )
    }
}

/// Scale a box from `src` space into `dst` space
pub fn map_box(bbox: &BoundingBox, src: Resolution, dst: Resolution) -> Result<BoundingBox> {
    src.validate()?;
    dst.validate()?;

    let sx = dst.width / src.width;
    let sy = dst.height / src.height;

    Ok(BoundingBox {
        x1: bbox.x1 * sx,
        y1: bbox.y1 * sy,
        x2: bbox.x2 * sx,
        y2: bbox.y2 * sy,
    })
}

/// `map_box` on a detection, keeping class and confidence
pub fn map_detection(
    detection: &DetectionBox,
    src: Resolution,
    dst: Resolution,
) -> Result<DetectionBox> {
    Ok(DetectionBox {
        bbox: map_box(&detection.bbox, src, dst)?,
        ..detection.clone()
    })
}
