//! Zone-aware classification.
//!
//! Turns the normalized detections of one request into a single
//! [`WasteVerdict`]. The two request shapes (a user-drawn zone, or the built-in
//! left/right zone pair) are variants of one [`ZoneMode`] so both paths go
//! through the same entry point.
//!
//! The classifier is fail-soft: it always produces a verdict and falls back to
//! `unknown` / not correct instead of erroring.

use serde::Serialize;

use crate::normalize::{Detection, WasteType};
use crate::zone::{Rect, ZoneSet};

/// Name reported for detections governed by a user-supplied zone.
pub const USER_ZONE: &str = "user";

/// Zone configuration for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneMode {
    /// Detection ran on a crop of the frame bounded by this rectangle (already
    /// clipped to the frame). Detections are in crop-local coordinates.
    User(Rect),
    /// Detection ran on the full frame; these zones are scaled to it.
    Default(ZoneSet),
}

impl ZoneMode {
    /// Built-in zones scaled to a `width x height` frame.
    pub fn default_for_image(width: u32, height: u32) -> Self {
        ZoneMode::Default(ZoneSet::for_image(width, height))
    }

    /// Offset from detector coordinates to frame coordinates.
    pub fn frame_offset(&self) -> (i32, i32) {
        match self {
            ZoneMode::User(rect) => (rect.x1, rect.y1),
            ZoneMode::Default(_) => (0, 0),
        }
    }

    /// Map a detection into original-frame coordinates.
    pub fn to_frame(&self, detection: &Detection) -> Detection {
        let (dx, dy) = self.frame_offset();
        detection.translated(dx, dy)
    }
}

/// Per-detection zone outcome, used for rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Zone the detection was assigned to, if any.
    pub zone: Option<String>,
    pub is_correct: bool,
}

impl Placement {
    pub fn in_zone(&self) -> bool {
        self.zone.is_some()
    }

    /// In a zone and of a type that belongs there.
    pub fn is_correct_disposal(&self) -> bool {
        self.in_zone() && self.is_correct
    }
}

/// Verdict for one detection that fell inside a built-in zone.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneVerdict {
    pub waste_type: WasteType,
    pub is_correct: bool,
    pub zone_name: String,
    pub confidence: f32,
}

/// The single request-level verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WasteVerdict {
    pub waste_type: WasteType,
    pub is_correct: bool,
}

impl WasteVerdict {
    pub fn unknown() -> Self {
        Self {
            waste_type: WasteType::Unknown,
            is_correct: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub verdict: WasteVerdict,
    /// One entry per input detection, same order.
    pub placements: Vec<Placement>,
}

/// Classify one request's detections.
///
/// Detections are expected to have passed the normalizer already, so every
/// entry is above the confidence threshold and has a valid box.
pub fn classify(detections: &[Detection], mode: &ZoneMode) -> Classification {
    match mode {
        ZoneMode::User(_) => classify_user_zone(detections),
        ZoneMode::Default(zones) => classify_default_zones(detections, zones),
    }
}

fn classify_user_zone(detections: &[Detection]) -> Classification {
    // The frame was cropped to the user zone, so everything detected is in it
    // and user placement counts as correct.
    let placements = detections
        .iter()
        .map(|_| Placement {
            zone: Some(USER_ZONE.to_string()),
            is_correct: true,
        })
        .collect();
    let verdict = match most_confident(detections) {
        Some(top) => WasteVerdict {
            waste_type: top.waste_type().clone(),
            is_correct: true,
        },
        None => WasteVerdict::unknown(),
    };
    Classification {
        verdict,
        placements,
    }
}

fn classify_default_zones(detections: &[Detection], zones: &ZoneSet) -> Classification {
    let mut placements = Vec::with_capacity(detections.len());
    let mut zone_verdicts = Vec::new();

    for detection in detections {
        let bbox = detection.bbox();
        let zone = zones.iter().find(|zone| zone.rect.intersects(&bbox));
        let placement = match zone {
            Some(zone) => {
                let is_correct = zone.accepts(detection.waste_type().as_str());
                zone_verdicts.push(ZoneVerdict {
                    waste_type: detection.waste_type().clone(),
                    is_correct,
                    zone_name: zone.name.clone(),
                    confidence: detection.confidence(),
                });
                Placement {
                    zone: Some(zone.name.clone()),
                    is_correct,
                }
            }
            None => Placement {
                zone: None,
                is_correct: false,
            },
        };
        placements.push(placement);
    }

    // Stable: equal confidences keep detection order.
    zone_verdicts.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let verdict = if let Some(top) = zone_verdicts.into_iter().next() {
        WasteVerdict {
            waste_type: top.waste_type,
            is_correct: top.is_correct,
        }
    } else if let Some(top) = most_confident(detections) {
        WasteVerdict {
            waste_type: top.waste_type().clone(),
            is_correct: false,
        }
    } else {
        WasteVerdict::unknown()
    };

    Classification {
        verdict,
        placements,
    }
}

/// Highest-confidence detection; the earliest one wins ties.
fn most_confident(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, d| match best {
        Some(b) if b.confidence() >= d.confidence() => Some(b),
        _ => Some(d),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{waste_taxonomy_labels, RawDetection};
    use crate::normalize::{ClassMap, Normalizer};

    const GLASS: u32 = 0;
    const METAL: u32 = 1;
    const PAPER: u32 = 2;
    const PLASTIC: u32 = 3;

    fn detections(raw: &[(u32, f32, [f32; 4])]) -> Vec<Detection> {
        let normalizer = Normalizer::new(ClassMap::from_labels(&waste_taxonomy_labels()), 0.5);
        let raw: Vec<RawDetection> = raw
            .iter()
            .map(|(id, conf, bbox)| RawDetection::new(*id, *conf, *bbox))
            .collect();
        normalizer.normalize(&raw)
    }

    fn default_mode() -> ZoneMode {
        ZoneMode::default_for_image(1280, 720)
    }

    fn verdict(waste: &str, is_correct: bool) -> WasteVerdict {
        WasteVerdict {
            waste_type: WasteType::from_name(waste),
            is_correct,
        }
    }

    #[test]
    fn empty_detections_are_unknown() {
        assert_eq!(classify(&[], &default_mode()).verdict, WasteVerdict::unknown());
        let user = ZoneMode::User(Rect::new(0, 0, 10, 10));
        assert_eq!(classify(&[], &user).verdict, WasteVerdict::unknown());
    }

    #[test]
    fn sole_correct_detection_in_right_zone() {
        let dets = detections(&[(PLASTIC, 0.9, [900.0, 100.0, 1100.0, 400.0])]);
        let result = classify(&dets, &default_mode());
        assert_eq!(result.verdict, verdict("plastic", true));
        assert_eq!(result.placements[0].zone.as_deref(), Some("right"));
        assert!(result.placements[0].is_correct_disposal());
    }

    #[test]
    fn paper_in_right_zone_is_incorrect() {
        let dets = detections(&[(PAPER, 0.9, [900.0, 100.0, 1100.0, 400.0])]);
        let result = classify(&dets, &default_mode());
        assert_eq!(result.verdict, verdict("paper", false));
        assert!(!result.placements[0].is_correct_disposal());
    }

    #[test]
    fn box_in_both_zones_is_assigned_left() {
        let dets = detections(&[(PAPER, 0.8, [100.0, 100.0, 1000.0, 300.0])]);
        let result = classify(&dets, &default_mode());
        assert_eq!(result.placements[0].zone.as_deref(), Some("left"));
        assert_eq!(result.verdict, verdict("paper", true));
    }

    #[test]
    fn highest_in_zone_confidence_wins() {
        let dets = detections(&[
            (METAL, 0.7, [950.0, 10.0, 1000.0, 60.0]),
            (PAPER, 0.95, [500.0, 10.0, 700.0, 60.0]),
            (GLASS, 0.85, [10.0, 10.0, 60.0, 60.0]),
        ]);
        let result = classify(&dets, &default_mode());
        // The 0.95 paper sits between the zones, so the 0.85 glass on the left wins.
        assert_eq!(result.verdict, verdict("glass", false));
        assert_eq!(result.placements[1], Placement { zone: None, is_correct: false });
    }

    #[test]
    fn ties_keep_detection_order() {
        let dets = detections(&[
            (METAL, 0.8, [950.0, 10.0, 1000.0, 60.0]),
            (PAPER, 0.8, [10.0, 10.0, 60.0, 60.0]),
        ]);
        assert_eq!(classify(&dets, &default_mode()).verdict, verdict("metal", true));

        let swapped = vec![dets[1].clone(), dets[0].clone()];
        assert_eq!(classify(&swapped, &default_mode()).verdict, verdict("paper", true));
    }

    #[test]
    fn out_of_zone_falls_back_to_global_best() {
        let dets = detections(&[
            (GLASS, 0.6, [500.0, 10.0, 600.0, 60.0]),
            (PLASTIC, 0.9, [650.0, 10.0, 700.0, 60.0]),
            (METAL, 0.9, [700.0, 10.0, 800.0, 60.0]),
        ]);
        let result = classify(&dets, &default_mode());
        assert_eq!(result.verdict, verdict("plastic", false));
        assert!(result.placements.iter().all(|p| !p.in_zone()));
    }

    #[test]
    fn touching_zone_edge_is_out_of_zone() {
        let dets = detections(&[(PAPER, 0.9, [400.0, 10.0, 426.0, 60.0])]);
        let result = classify(&dets, &default_mode());
        assert_eq!(result.placements[0].zone.as_deref(), Some("left"));

        // Starts exactly on the left zone's right edge.
        let dets = detections(&[(PAPER, 0.9, [426.0, 10.0, 500.0, 60.0])]);
        let result = classify(&dets, &default_mode());
        assert!(!result.placements[0].in_zone());
        assert_eq!(result.verdict, verdict("paper", false));
    }

    #[test]
    fn user_zone_reports_best_detection_as_correct() {
        let dets = detections(&[
            (PAPER, 0.6, [0.0, 0.0, 10.0, 10.0]),
            (METAL, 0.8, [20.0, 20.0, 40.0, 40.0]),
            (GLASS, 0.8, [50.0, 50.0, 60.0, 60.0]),
        ]);
        let result = classify(&dets, &ZoneMode::User(Rect::new(100, 100, 300, 300)));
        assert_eq!(result.verdict, verdict("metal", true));
        assert!(result.placements.iter().all(Placement::is_correct_disposal));
    }

    #[test]
    fn user_zone_maps_back_to_frame() {
        let dets = detections(&[(PLASTIC, 0.8, [10.0, 20.0, 50.0, 60.0])]);
        let mode = ZoneMode::User(Rect::new(100, 100, 300, 300));
        assert_eq!(mode.to_frame(&dets[0]).bbox(), Rect::new(110, 120, 150, 160));
        assert_eq!(default_mode().to_frame(&dets[0]).bbox(), dets[0].bbox());
    }

    #[test]
    fn verdict_serializes_as_strings() {
        let json = serde_json::to_value(verdict("glass", true)).unwrap();
        assert_eq!(json, serde_json::json!({"waste_type": "glass", "is_correct": true}));
        let json = serde_json::to_value(WasteVerdict::unknown()).unwrap();
        assert_eq!(json, serde_json::json!({"waste_type": "unknown", "is_correct": false}));
    }
}
