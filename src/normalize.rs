//! Detection normalization.
//!
//! Maps detector-specific class ids onto the canonical waste vocabulary and
//! filters raw detector output at ingress: detections under the confidence
//! threshold and malformed boxes never reach the classifier.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::detect::{LabelNames, RawDetection};
use crate::zone::{Rect, MAX_COORD};

/// Canonical waste category.
///
/// `Other` carries the lowercased detector label of anything that is not one
/// of the four waste categories.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WasteType {
    Glass,
    Metal,
    Paper,
    Plastic,
    Other(String),
    Unknown,
}

impl WasteType {
    pub fn as_str(&self) -> &str {
        match self {
            WasteType::Glass => "glass",
            WasteType::Metal => "metal",
            WasteType::Paper => "paper",
            WasteType::Plastic => "plastic",
            WasteType::Other(name) => name,
            WasteType::Unknown => "unknown",
        }
    }

    /// Parse a canonical name. Non-canonical names become `Other`.
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "glass" => WasteType::Glass,
            "metal" => WasteType::Metal,
            "paper" => WasteType::Paper,
            "plastic" => WasteType::Plastic,
            "unknown" | "" => WasteType::Unknown,
            other => WasteType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for WasteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WasteType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Primary table for the 4-class waste taxonomy.
const PRIMARY_TABLE: [(u32, WasteType); 4] = [
    (0, WasteType::Glass),
    (1, WasteType::Metal),
    (2, WasteType::Paper),
    (3, WasteType::Plastic),
];

const KEYWORDS: [(&[&str], WasteType); 4] = [
    (&["paper", "cardboard"], WasteType::Paper),
    (&["glass"], WasteType::Glass),
    (&["metal", "can"], WasteType::Metal),
    (&["plastic", "bottle"], WasteType::Plastic),
];

/// Keyword normalization of a single class name.
///
/// Case-insensitive substring match, first keyword set wins. Unmatched names
/// pass through lowercased.
pub fn normalize(class_name: &str) -> WasteType {
    let lower = class_name.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, waste)| waste.clone())
        .unwrap_or_else(|| WasteType::from_name(&lower))
}

/// Class id to waste type mapping for one loaded model.
///
/// Built once per model load from the detector's static label set.
#[derive(Clone, Debug)]
pub struct ClassMap {
    labels: LabelNames,
    waste_types: BTreeMap<u32, WasteType>,
    primary: bool,
}

impl ClassMap {
    pub fn from_labels(labels: &LabelNames) -> Self {
        let primary = labels.len() == PRIMARY_TABLE.len()
            && PRIMARY_TABLE.iter().all(|(id, _)| labels.contains_key(id));
        let waste_types = if primary {
            PRIMARY_TABLE.iter().cloned().collect()
        } else {
            labels
                .iter()
                .map(|(id, name)| (*id, normalize(name)))
                .collect()
        };
        Self {
            labels: labels.clone(),
            waste_types,
            primary,
        }
    }

    /// True when the detector uses the 4-class waste taxonomy directly.
    pub fn uses_primary_table(&self) -> bool {
        self.primary
    }

    pub fn class_name(&self, class_id: u32) -> String {
        self.labels
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    pub fn waste_type(&self, class_id: u32) -> WasteType {
        self.waste_types
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| WasteType::from_name(&self.class_name(class_id)))
    }
}

/// A normalized detection. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    class_id: u32,
    class_name: String,
    waste_type: WasteType,
    confidence: f32,
    #[serde(rename = "bbox", serialize_with = "serialize_bbox")]
    bbox: Rect,
}

fn serialize_bbox<S: Serializer>(rect: &Rect, serializer: S) -> Result<S::Ok, S::Error> {
    let corners: [i32; 4] = (*rect).into();
    corners.serialize(serializer)
}

impl Detection {
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn waste_type(&self) -> &WasteType {
        &self.waste_type
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    /// Same detection with the box shifted by `(dx, dy)`.
    pub fn translated(&self, dx: i32, dy: i32) -> Detection {
        Detection {
            bbox: self.bbox.translate(dx, dy),
            ..self.clone()
        }
    }
}

/// Ingress filter between the detector and the classifier.
#[derive(Clone, Debug)]
pub struct Normalizer {
    class_map: ClassMap,
    confidence_threshold: f32,
}

impl Normalizer {
    pub fn new(class_map: ClassMap, confidence_threshold: f32) -> Self {
        Self {
            class_map,
            confidence_threshold,
        }
    }

    pub fn class_map(&self) -> &ClassMap {
        &self.class_map
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Normalize raw detector output, preserving detector order.
    ///
    /// Drops detections below the threshold, non-finite confidences, boxes
    /// without exactly four coordinates, and boxes with non-finite coordinates.
    pub fn normalize(&self, raw: &[RawDetection]) -> Vec<Detection> {
        raw.iter().filter_map(|r| self.normalize_one(r)).collect()
    }

    fn normalize_one(&self, raw: &RawDetection) -> Option<Detection> {
        if !raw.confidence.is_finite() || raw.confidence < self.confidence_threshold {
            return None;
        }
        let bbox = to_rect(&raw.bbox)?;
        Some(Detection {
            class_id: raw.class_id,
            class_name: self.class_map.class_name(raw.class_id),
            waste_type: self.class_map.waste_type(raw.class_id),
            confidence: raw.confidence,
            bbox,
        })
    }
}

fn to_rect(coords: &[f32]) -> Option<Rect> {
    let [x1, y1, x2, y2]: [f32; 4] = coords.try_into().ok()?;
    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return None;
    }
    let bound = MAX_COORD as f32;
    let coord = |v: f32| v.clamp(-bound, bound) as i32;
    let (x1, y1, x2, y2) = (coord(x1), coord(y1), coord(x2), coord(y2));
    Some(Rect::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)))
}
