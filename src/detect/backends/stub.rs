use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{DetectorBackend, LabelNames};
use crate::detect::loader::waste_taxonomy_labels;
use crate::detect::result::RawDetection;

/// Stub backend for testing and smoke runs.
///
/// Returns the same scripted detections for every image and remembers the size
/// of the last image it was handed.
pub struct StubBackend {
    labels: LabelNames,
    detections: Vec<RawDetection>,
    last_input: Mutex<Option<(u32, u32)>>,
}

impl StubBackend {
    /// Stub over the 4-class waste taxonomy that never detects anything.
    pub fn new() -> Self {
        Self::with_labels(waste_taxonomy_labels())
    }

    pub fn with_labels(labels: LabelNames) -> Self {
        Self {
            labels,
            detections: Vec::new(),
            last_input: Mutex::new(None),
        }
    }

    /// Script the detections returned by every `infer` call.
    pub fn with_detections(mut self, detections: Vec<RawDetection>) -> Self {
        self.detections = detections;
        self
    }

    /// Dimensions of the most recent image passed to `infer`.
    pub fn last_input_size(&self) -> Option<(u32, u32)> {
        self.last_input.lock().ok().and_then(|guard| *guard)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn label_names(&self) -> &LabelNames {
        &self.labels
    }

    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let mut last = self
            .last_input
            .lock()
            .map_err(|_| anyhow!("stub backend lock poisoned"))?;
        *last = Some(image.dimensions());
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_replays_script() {
        let backend = StubBackend::new()
            .with_detections(vec![RawDetection::new(3, 0.9, [1.0, 2.0, 3.0, 4.0])]);
        assert_eq!(backend.last_input_size(), None);

        let out = backend.infer(&RgbImage::new(8, 6)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 3);
        assert_eq!(backend.last_input_size(), Some((8, 6)));

        let again = backend.infer(&RgbImage::new(4, 4)).unwrap();
        assert_eq!(again, out);
        assert_eq!(backend.last_input_size(), Some((4, 4)));
    }

    #[test]
    fn stub_backend_defaults_to_waste_labels() {
        let backend = StubBackend::default();
        assert_eq!(backend.label_names().len(), 4);
        assert_eq!(backend.label_names()[&2], "paper");
        assert!(backend.infer(&RgbImage::new(2, 2)).unwrap().is_empty());
    }
}
