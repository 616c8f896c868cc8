//! Result rendering.
//!
//! Draws zone outlines and detection boxes over the original frame and encodes
//! the result as JPEG. Rendering never fails the request: a missing font drops
//! the captions, and an encoder failure yields an empty buffer.

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};

use crate::classify::{Placement, ZoneMode};
use crate::normalize::Detection;
use crate::zone::Rect;

const LEFT_ZONE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const RIGHT_ZONE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const USER_ZONE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CORRECT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const INCORRECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const LINE_THICKNESS: i32 = 2;
const ZONE_LABEL_SCALE: f32 = 28.0;
const DETECTION_LABEL_SCALE: f32 = 16.0;
const JPEG_PREFIX: &str = "data:image/jpeg;base64,";

pub struct Renderer {
    font: Option<FontArc>,
}

impl Renderer {
    /// Renderer without captions.
    pub fn new() -> Self {
        Self { font: None }
    }

    /// Renderer with captions in the TTF/OTF font at `path`.
    ///
    /// Falls back to a caption-less renderer when the font cannot be loaded.
    pub fn with_font_file(path: &Path) -> Self {
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self { font: Some(font) },
            Err(err) => {
                log::warn!(
                    "caption font {} unavailable ({}); rendering boxes only",
                    path.display(),
                    err
                );
                Self::new()
            }
        }
    }

    pub fn has_captions(&self) -> bool {
        self.font.is_some()
    }

    /// Annotate `frame` and encode it as JPEG.
    ///
    /// `detections` are in detector coordinates (crop-local in user-zone mode)
    /// and are mapped back to the frame through `mode`. `placements` pairs with
    /// `detections` by index; a missing entry renders as incorrect.
    pub fn render(
        &self,
        frame: &DynamicImage,
        mode: &ZoneMode,
        detections: &[Detection],
        placements: &[Placement],
    ) -> Vec<u8> {
        let mut canvas = frame.to_rgb8();

        match mode {
            ZoneMode::Default(zones) => {
                for (zone, color) in [
                    (&zones.left, LEFT_ZONE_COLOR),
                    (&zones.right, RIGHT_ZONE_COLOR),
                ] {
                    draw_box(&mut canvas, &zone.rect, color);
                    self.caption(
                        &mut canvas,
                        &zone.label,
                        zone.rect.x1 + 10,
                        zone.rect.y1 + 10,
                        ZONE_LABEL_SCALE,
                        color,
                    );
                }
            }
            ZoneMode::User(rect) => draw_box(&mut canvas, rect, USER_ZONE_COLOR),
        }

        for (idx, detection) in detections.iter().enumerate() {
            let correct = placements
                .get(idx)
                .is_some_and(Placement::is_correct_disposal);
            let color = if correct {
                CORRECT_COLOR
            } else {
                INCORRECT_COLOR
            };
            let bbox = mode.to_frame(detection).bbox();
            draw_box(&mut canvas, &bbox, color);
            let label = caption_text(detection);
            self.caption(
                &mut canvas,
                &label,
                bbox.x1,
                bbox.y1.saturating_sub(10 + DETECTION_LABEL_SCALE as i32).max(0),
                DETECTION_LABEL_SCALE,
                color,
            );
        }

        encode_jpeg(canvas)
    }

    fn caption(
        &self,
        canvas: &mut RgbImage,
        text: &str,
        x: i32,
        y: i32,
        scale: f32,
        color: Rgb<u8>,
    ) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x, y, PxScale::from(scale), font, text);
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

/// `label: confidence%` with the percentage truncated.
pub fn caption_text(detection: &Detection) -> String {
    format!(
        "{}: {}%",
        detection.waste_type(),
        (detection.confidence() * 100.0) as i32
    )
}

/// `data:` URI for a JPEG buffer.
pub fn jpeg_data_uri(jpeg: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
    format!("{JPEG_PREFIX}{encoded}")
}

fn draw_box(canvas: &mut RgbImage, rect: &Rect, color: Rgb<u8>) {
    // Edges beyond the canvas stay beyond it, but line lengths stay bounded
    // by the canvas size.
    let margin = LINE_THICKNESS + 1;
    let max_x = i32::try_from(canvas.width()).unwrap_or(i32::MAX - margin) + margin;
    let max_y = i32::try_from(canvas.height()).unwrap_or(i32::MAX - margin) + margin;
    let rect = &Rect::new(
        rect.x1.clamp(-margin, max_x),
        rect.y1.clamp(-margin, max_y),
        rect.x2.clamp(-margin, max_x),
        rect.y2.clamp(-margin, max_y),
    );
    for inset in 0..LINE_THICKNESS {
        let x = rect.x1 + inset;
        let y = rect.y1 + inset;
        let w = rect.width() - 2 * inset;
        let h = rect.height() - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        draw_hollow_rect_mut(
            canvas,
            imageproc::rect::Rect::at(x, y).of_size(w as u32, h as u32),
            color,
        );
    }
}

fn encode_jpeg(canvas: RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoded =
        DynamicImage::ImageRgb8(canvas).write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg);
    match encoded {
        Ok(()) => buf,
        Err(err) => {
            log::warn!("failed to encode annotated image: {}", err);
            Vec::new()
        }
    }
}
