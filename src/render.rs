//! QR code rendering.

use std::path::PathBuf;

use ab_glyph::{FontRef, PxScale};
use chrono::Local;
use image::{GrayImage, ImageFormat, Luma, imageops};
use imageproc::drawing::{draw_text_mut, text_size};
use qrcode::{EcLevel, QrCode};

use crate::artifacts;
use crate::error::AgentError;

// DejaVu Sans, see assets/fonts/DejaVu-LICENSE.
static LABEL_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Height of the caption strip added below a labelled code.
pub const LABEL_STRIP_PX: u32 = 60;
const LABEL_SCALE: f32 = 24.0;
const LABEL_MARGIN_PX: u32 = 10;

/// Renders a payload into a scannable image file.
pub trait Renderer: Send + Sync {
    /// Encodes `payload` and returns the written image path. `label` is a
    /// human-readable caption for the artifact.
    fn render(&self, payload: &str, label: Option<&str>) -> Result<PathBuf, AgentError>;
}

/// Writes PNG QR codes at error correction level H.
#[derive(Debug, Clone)]
pub struct QrRenderer {
    output_dir: PathBuf,
    module_px: u32,
}

impl QrRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            module_px: 10,
        }
    }
}

impl Renderer for QrRenderer {
    fn render(&self, payload: &str, label: Option<&str>) -> Result<PathBuf, AgentError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)
            .map_err(|e| AgentError::Render(e.to_string()))?;
        let image = code
            .render::<Luma<u8>>()
            .quiet_zone(true)
            .module_dimensions(self.module_px, self.module_px)
            .build();
        let image = match label {
            Some(text) => with_caption(&image, text)?,
            None => image,
        };

        let (path, file) = artifacts::claim_png(&self.output_dir, "qr_code", Local::now())?;
        drop(file);
        if let Err(e) = image.save_with_format(&path, ImageFormat::Png) {
            let _ = std::fs::remove_file(&path);
            return Err(AgentError::Render(e.to_string()));
        }

        tracing::info!(
            path = %path.display(),
            label = label.unwrap_or("Attendance QR"),
            version = ?code.version(),
            "QR code generated"
        );
        Ok(path)
    }
}

/// Extends `qr` with a white strip and draws `text` centred on it.
fn with_caption(qr: &GrayImage, text: &str) -> Result<GrayImage, AgentError> {
    let font = FontRef::try_from_slice(LABEL_FONT)
        .map_err(|e| AgentError::Render(format!("label font unusable: {e}")))?;

    let width = qr.width();
    let mut canvas = GrayImage::from_pixel(width, qr.height() + LABEL_STRIP_PX, Luma([255]));
    imageops::overlay(&mut canvas, qr, 0, 0);

    // Shrink the caption until it fits between the side margins.
    let room = width.saturating_sub(2 * LABEL_MARGIN_PX).max(1);
    let mut scale = PxScale::from(LABEL_SCALE);
    let (mut text_w, mut text_h) = text_size(scale, &font, text);
    if text_w > room {
        scale = PxScale::from(LABEL_SCALE * room as f32 / text_w as f32);
        (text_w, text_h) = text_size(scale, &font, text);
    }

    let x = width.saturating_sub(text_w) / 2;
    let y = qr.height() + LABEL_STRIP_PX.saturating_sub(text_h) / 2;
    draw_text_mut(&mut canvas, Luma([0]), x as i32, y as i32, scale, &font, text);
    Ok(canvas)
}
