//! Request pipeline for one detection call.
//!
//! decode → zone → (crop) → infer → normalize → classify → render → respond,
//! then a best-effort append to the detection log.

use std::time::Instant;

use image::DynamicImage;
use serde::Serialize;

use crate::classify::{classify, WasteVerdict, ZoneMode};
use crate::context::AppContext;
use crate::error::DetectError;
use crate::normalize::Detection;
use crate::render::jpeg_data_uri;
use crate::storage::DetectionRecord;
use crate::zone::{crop, Rect};

pub const INVALID_IMAGE: &str = "Invalid image file";
pub const INVALID_ZONE: &str = "Invalid detection zone format";

#[derive(Clone, Debug, Serialize)]
pub struct Performance {
    /// Seconds spent inside the detector.
    pub inference_time: f64,
    pub inference_fps: f64,
    /// Seconds from request start to response.
    pub total_processing_time: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct DetectionResponse {
    pub timestamp: String,
    /// In original-image coordinates.
    pub detections: Vec<Detection>,
    pub detection_count: usize,
    pub result_image: String,
    pub performance: Performance,
    pub waste_detection: WasteVerdict,
}

/// Parse the optional `detection_zone` form field.
///
/// Absent, blank and JSON `null` all mean no zone. Otherwise the value must be
/// an array of exactly four finite numbers; fractions are truncated.
pub fn parse_zone(field: Option<&str>) -> Result<Option<Rect>, DetectError> {
    let Some(raw) = field.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| DetectError::input(INVALID_ZONE))?;
    let coords = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Array(items) if items.len() == 4 => items,
        _ => return Err(DetectError::input(INVALID_ZONE)),
    };
    let mut out = [0i32; 4];
    for (slot, item) in out.iter_mut().zip(&coords) {
        let v = item
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DetectError::input(INVALID_ZONE))?;
        *slot = v.trunc() as i32;
    }
    Ok(Some(Rect::from(out)))
}

fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DetectError> {
    if bytes.is_empty() {
        return Err(DetectError::input(INVALID_IMAGE));
    }
    image::load_from_memory(bytes).map_err(|err| {
        log::debug!("image decode failed: {}", err);
        DetectError::input(INVALID_IMAGE)
    })
}

/// Run detection on one uploaded image.
pub fn detect_waste(
    ctx: &AppContext,
    image_bytes: &[u8],
    zone_field: Option<&str>,
) -> Result<DetectionResponse, DetectError> {
    let started = Instant::now();
    let frame = decode_image(image_bytes)?;
    log::info!(
        "detect request: {}x{} image, {} bytes",
        frame.width(),
        frame.height(),
        image_bytes.len()
    );

    let (mode, cropped) = match parse_zone(zone_field)? {
        Some(zone) => {
            let (clipped, cropped) = crop(&frame, &zone).ok_or_else(|| {
                DetectError::input(format!(
                    "Detection zone {:?} lies outside the {}x{} image",
                    <[i32; 4]>::from(zone),
                    frame.width(),
                    frame.height()
                ))
            })?;
            log::debug!("user detection zone {:?}", <[i32; 4]>::from(clipped));
            (ZoneMode::User(clipped), Some(cropped))
        }
        None => (ZoneMode::default_for_image(frame.width(), frame.height()), None),
    };

    let detector = ctx.detector()?;
    let input = cropped.as_ref().unwrap_or(&frame).to_rgb8();

    let inference_started = Instant::now();
    let raw = detector.backend.infer(&input)?;
    let inference_time = inference_started.elapsed().as_secs_f64();
    let inference_fps = if inference_time > 0.0 {
        1.0 / inference_time
    } else {
        0.0
    };

    let detections = detector.normalizer.normalize(&raw);
    let classification = classify(&detections, &mode);
    let jpeg = ctx
        .renderer()
        .render(&frame, &mode, &detections, &classification.placements);
    let verdict = classification.verdict;

    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    if let Some(store) = ctx.log_store() {
        let record = DetectionRecord {
            timestamp: timestamp.clone(),
            waste_type: verdict.waste_type.to_string(),
            is_correct: verdict.is_correct,
            inference_speed: inference_fps,
        };
        if let Err(err) = store.append(&record) {
            log::warn!("failed to log detection: {:#}", err);
        }
    }

    let detections: Vec<Detection> = detections.iter().map(|d| mode.to_frame(d)).collect();
    let total_processing_time = started.elapsed().as_secs_f64();
    log::info!(
        "detected {} (correct: {}) from {} detections in {:.3}s",
        verdict.waste_type,
        verdict.is_correct,
        detections.len(),
        total_processing_time
    );

    Ok(DetectionResponse {
        timestamp,
        detection_count: detections.len(),
        detections,
        result_image: jpeg_data_uri(&jpeg),
        performance: Performance {
            inference_time,
            inference_fps,
            total_processing_time,
        },
        waste_detection: verdict,
    })
}
