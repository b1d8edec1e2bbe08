//! Overlay composition and rasterisation
//!
//! `compose_overlay` is pure: it rescales the last known detections from the
//! working resolution into display space and picks a style per box.
//! `OverlayRenderer` paints an `Overlay` onto an RGB frame.

use crate::error::{Error, Result};
use crate::geometry::{map_box, Resolution};
use crate::models::{BoundingBox, DetectionBox};
use ab_glyph::FontVec;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::Path;

/// Box colour for violation classes (`NO-*`)
pub const VIOLATION_COLOR: Rgb<u8> = Rgb([0xf8, 0x51, 0x49]);
/// Box colour for compliant classes
pub const COMPLIANT_COLOR: Rgb<u8> = Rgb([0x3f, 0xb9, 0x50]);

const LABEL_HEIGHT: u32 = 20;
const LABEL_TEXT_SCALE: f32 = 14.0;
const BADGE_BACKGROUND: Rgb<u8> = Rgb([16, 20, 26]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Visual distinction of a box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxStyle {
    Violation,
    Compliant,
}

impl BoxStyle {
    pub fn color(&self) -> Rgb<u8> {
        match self {
            BoxStyle::Violation => VIOLATION_COLOR,
            BoxStyle::Compliant => COMPLIANT_COLOR,
        }
    }
}

/// One box in display space
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayBox {
    pub rect: BoundingBox,
    pub label: String,
    pub style: BoxStyle,
}

/// Everything drawn on top of one displayed frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub display: Resolution,
    pub boxes: Vec<OverlayBox>,
    pub latency_label: Option<String>,
}

/// Detection label, e.g. `NO-Hardhat 87%`
pub fn detection_label(detection: &DetectionBox) -> String {
    let name = if detection.class_name.is_empty() {
        "Unknown"
    } else {
        detection.class_name.as_str()
    };
    format!("{} {:.0}%", name, detection.confidence * 100.0)
}

/// Build the overlay for one display frame
///
/// `latency_ms` is the last completed inference latency; nothing is shown
/// before the first inference completes.
pub fn compose_overlay(
    detections: &[DetectionBox],
    latency_ms: Option<f64>,
    working: Resolution,
    display: Resolution,
) -> Result<Overlay> {
    let boxes = detections
        .iter()
        .map(|det| {
            Ok(OverlayBox {
                rect: map_box(&det.bbox, working, display)?,
                label: detection_label(det),
                style: if det.is_violation() {
                    BoxStyle::Violation
                } else {
                    BoxStyle::Compliant
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Overlay {
        display,
        boxes,
        latency_label: latency_ms
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| format!("{:.0}ms", ms)),
    })
}

/// Paints overlays onto frames
#[derive(Default)]
pub struct OverlayRenderer {
    font: Option<FontVec>,
}

impl OverlayRenderer {
    /// Renderer that draws boxes and label plates but no glyphs
    pub fn new() -> Self {
        Self { font: None }
    }

    /// Renderer with a TTF/OTF font for label text
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| Error::Config(format!("invalid font {}: {}", path.display(), e)))?;
        Ok(Self { font: Some(font) })
    }

    /// Draw `overlay` onto `canvas` (which must already be display-sized)
    pub fn draw(&self, canvas: &mut RgbImage, overlay: &Overlay) {
        let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
        if cw == 0 || ch == 0 {
            return;
        }

        for b in &overlay.boxes {
            let color = b.style.color();
            let x1 = (b.rect.x1.round() as i32).clamp(0, cw - 1);
            let y1 = (b.rect.y1.round() as i32).clamp(0, ch - 1);
            let x2 = (b.rect.x2.round() as i32).clamp(0, cw - 1);
            let y2 = (b.rect.y2.round() as i32).clamp(0, ch - 1);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            // 2px outline
            for inset in 0..2 {
                let w = (x2 - x1 - 2 * inset).max(1) as u32;
                let h = (y2 - y1 - 2 * inset).max(1) as u32;
                draw_hollow_rect_mut(canvas, Rect::at(x1 + inset, y1 + inset).of_size(w, h), color);
            }

            let plate_w = (b.label.chars().count() as u32) * 7 + 10;
            let plate_y = (y1 - LABEL_HEIGHT as i32).max(0);
            draw_filled_rect_mut(
                canvas,
                Rect::at(x1, plate_y).of_size(plate_w, LABEL_HEIGHT),
                color,
            );
            if let Some(font) = &self.font {
                draw_text_mut(
                    canvas,
                    TEXT_COLOR,
                    x1 + 5,
                    plate_y + 3,
                    LABEL_TEXT_SCALE,
                    font,
                    &b.label,
                );
            }
        }

        if let Some(label) = &overlay.latency_label {
            let badge_x = (cw - 70).max(0);
            draw_filled_rect_mut(canvas, Rect::at(badge_x, 8).of_size(62, 22), BADGE_BACKGROUND);
            if let Some(font) = &self.font {
                draw_text_mut(canvas, COMPLIANT_COLOR, badge_x + 5, 12, 13.0_f32, font, label);
            }
        }
    }
}
