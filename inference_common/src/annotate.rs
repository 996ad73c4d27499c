//! Burns detections into frames: class-colored boxes and text labels.
//!
//! Labels and overlays use DejaVu Sans compiled into the binary unless a
//! font file is given.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detection::Detection;

/// Ultralytics default palette.
const PALETTE: [[u8; 3]; 20] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

/// Bitstream Vera license, see `assets/DejaVuSans-LICENSE`.
static DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

const LABEL_SCALE: f32 = 16.0;
const OVERLAY_SCALE: f32 = 32.0;
pub const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    /// Annotator drawing with the bundled font.
    pub fn new() -> Self {
        let font = FontArc::try_from_slice(DEFAULT_FONT)
            .map_err(|e| log::warn!("Bundled font unusable, drawing boxes only: {e}"))
            .ok();
        Self { font }
    }

    /// Draws boxes and nothing else.
    pub fn boxes_only() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    pub fn from_font_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("Failed to read font {path:?}"))?;
        let font = FontArc::try_from_vec(data)
            .map_err(|e| anyhow::anyhow!("Invalid font file {path:?}: {e}"))?;
        log::info!("Loaded annotation font from {path:?}");
        Ok(Self::with_font(font))
    }

    pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
        let (width, height) = image.dimensions();
        for detection in detections {
            let bbox = detection.bbox.clamp(width as f32, height as f32);
            let w = bbox.width() as u32;
            let h = bbox.height() as u32;
            if w == 0 || h == 0 {
                continue;
            }
            let color = class_color(detection.class_id);
            let x = bbox.xmin as i32;
            let y = bbox.ymin as i32;
            // 2px outline
            draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), color);
            if w > 2 && h > 2 {
                draw_hollow_rect_mut(image, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), color);
            }

            if let Some(font) = &self.font {
                let text = format!(
                    "{} {:.2}",
                    detection.label(),
                    detection.bbox.detector_confidence
                );
                let scale = PxScale::from(LABEL_SCALE);
                let (tw, th) = text_size(scale, font, &text);
                let label_y = (y - th as i32 - 2).max(0);
                draw_filled_rect_mut(
                    image,
                    Rect::at(x, label_y).of_size(tw.max(1) + 4, th.max(1) + 2),
                    color,
                );
                draw_text_mut(image, Rgb([255, 255, 255]), x + 2, label_y, scale, font, &text);
            }
        }
    }

    /// Draws a line of text at (`x`, `y`). No-op without a font.
    pub fn draw_overlay_text(&self, image: &mut RgbImage, text: &str, x: i32, y: i32) {
        if let Some(font) = &self.font {
            draw_text_mut(image, OVERLAY_COLOR, x, y, PxScale::from(OVERLAY_SCALE), font, text);
        }
    }
}
