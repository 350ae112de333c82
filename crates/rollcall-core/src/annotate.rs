//! Burns recognition results into a frame for direct display.

use crate::types::RecognitionResult;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_PADDING: i32 = 5;
const DEFAULT_TEXT_HEIGHT: f32 = 20.0;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a usable TrueType/OpenType font")]
    InvalidFont(String),
}

/// Caption shown next to a face, e.g. `An (87.25%)`.
pub fn label_text(result: &RecognitionResult) -> String {
    format!("{} ({:.2}%)", result.name, result.confidence)
}

/// Draws a box around each face and a filled caption above it.
///
/// Without a font the caption background is still drawn, sized from an
/// estimated text extent, but no glyphs are rendered.
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(DEFAULT_TEXT_HEIGHT),
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontVec) -> Self {
        Self {
            font: Some(font),
            ..Self::default()
        }
    }

    pub fn from_font_file(path: &Path) -> Result<Self, AnnotateError> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| AnnotateError::InvalidFont(path.display().to_string()))?;
        tracing::debug!(path = %path.display(), "loaded annotation font");
        Ok(Self::with_font(font))
    }

    fn text_extent(&self, text: &str) -> (i32, i32) {
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(self.scale, font, text);
                (w as i32, h as i32)
            }
            None => {
                let w = text.chars().count() as f32 * self.scale.x * 0.55;
                (w.round() as i32, self.scale.y.round() as i32)
            }
        }
    }

    pub fn draw(&self, frame: &mut RgbImage, result: &RecognitionResult) {
        let r = result.region;
        if r.width == 0 || r.height == 0 {
            return;
        }

        for inset in 0..BOX_THICKNESS {
            if r.width <= 2 * inset || r.height <= 2 * inset {
                break;
            }
            let rect = Rect::at((r.x + inset) as i32, (r.y + inset) as i32)
                .of_size(r.width - 2 * inset, r.height - 2 * inset);
            draw_hollow_rect_mut(frame, rect, BOX_COLOR);
        }

        let text = label_text(result);
        let (tw, th) = self.text_extent(&text);
        let (x, y, w, h) = (r.x as i32, r.y as i32, r.width as i32, r.height as i32);
        let text_x = x + (w - tw) / 2;
        // Baseline above the box, or below it when too close to the top edge.
        let text_y = if y - 10 > 10 { y - 10 } else { y + h + 30 };

        let bg_w = (tw + 2 * LABEL_PADDING).max(1) as u32;
        let bg_h = (th + 2 * LABEL_PADDING).max(1) as u32;
        let background = Rect::at(text_x - LABEL_PADDING, text_y - th - LABEL_PADDING).of_size(bg_w, bg_h);
        draw_filled_rect_mut(frame, background, BOX_COLOR);

        if let Some(font) = &self.font {
            draw_text_mut(frame, TEXT_COLOR, text_x, text_y - th, self.scale, font, &text);
        }
    }

    /// Annotate every result, in order.
    pub fn draw_all(&self, frame: &mut RgbImage, results: &[RecognitionResult]) {
        for result in results {
            self.draw(frame, result);
        }
    }
}
