//! Aggregates for the analytics endpoint.
//!
//! Computed over the most recent log records. When there is no log store, or
//! the store fails, a fixed illustrative dataset is served instead; this
//! endpoint never reports an error.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::normalize::WasteType;
use crate::storage::{DetectionLogStore, DetectionRecord};

/// Records considered for the aggregates.
pub const ANALYTICS_WINDOW: usize = 100;
/// Records echoed back as `recent_detections`.
pub const RECENT_LIMIT: usize = 10;

const CANONICAL_TYPES: [WasteType; 4] = [
    WasteType::Glass,
    WasteType::Metal,
    WasteType::Paper,
    WasteType::Plastic,
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecentDetection {
    pub timestamp: String,
    pub waste_type: String,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_speed: Option<f64>,
}

impl From<&DetectionRecord> for RecentDetection {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            timestamp: record.timestamp.clone(),
            waste_type: record.waste_type.clone(),
            is_correct: record.is_correct,
            inference_speed: Some(record.inference_speed),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Analytics {
    /// Always holds the four canonical waste types; other types are not counted.
    pub waste_types: BTreeMap<String, u64>,
    pub correct_disposals: u64,
    pub incorrect_disposals: u64,
    pub total_detections: u64,
    pub recent_detections: Vec<RecentDetection>,
}

impl Analytics {
    /// Aggregate `records`, which are expected newest first.
    pub fn from_records(records: &[DetectionRecord]) -> Self {
        let mut waste_types: BTreeMap<String, u64> = CANONICAL_TYPES
            .iter()
            .map(|t| (t.as_str().to_string(), 0))
            .collect();
        let mut correct = 0;
        for record in records {
            if let Some(count) = waste_types.get_mut(record.waste_type.as_str()) {
                *count += 1;
            }
            if record.is_correct {
                correct += 1;
            }
        }
        let total = records.len() as u64;
        Self {
            waste_types,
            correct_disposals: correct,
            incorrect_disposals: total - correct,
            total_detections: total,
            recent_detections: records
                .iter()
                .take(RECENT_LIMIT)
                .map(RecentDetection::from)
                .collect(),
        }
    }

    /// Illustrative dataset served when the log is unavailable.
    pub fn fallback() -> Self {
        let waste_types = [("plastic", 45), ("paper", 32), ("metal", 15), ("glass", 8)]
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        let recent = |time: &str, waste: &str, is_correct| RecentDetection {
            timestamp: format!("2023-04-01T{time}"),
            waste_type: waste.to_string(),
            is_correct,
            inference_speed: None,
        };
        Self {
            waste_types,
            correct_disposals: 78,
            incorrect_disposals: 22,
            total_detections: 100,
            recent_detections: vec![
                recent("10:30:00", "plastic", true),
                recent("10:35:00", "paper", false),
                recent("10:40:00", "metal", true),
            ],
        }
    }
}

/// Analytics from `store`, or the fallback dataset.
pub fn analytics(store: Option<&dyn DetectionLogStore>) -> Analytics {
    let Some(store) = store else {
        log::debug!("no detection log configured; serving fallback analytics");
        return Analytics::fallback();
    };
    match store.query_recent(ANALYTICS_WINDOW) {
        Ok(records) => Analytics::from_records(&records),
        Err(err) => {
            log::warn!("detection log query failed, serving fallback analytics: {:#}", err);
            Analytics::fallback()
        }
    }
}
