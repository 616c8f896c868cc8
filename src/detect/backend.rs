use std::collections::BTreeMap;

use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Class id to human-readable label, as published by the model.
pub type LabelNames = BTreeMap<u32, String>;

/// Detector backend trait.
///
/// A backend is loaded once at startup and shared read-only across request
/// threads, so `infer` takes `&self`. Backends must not retain the image after
/// the call returns.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Static label set of the loaded model.
    fn label_names(&self) -> &LabelNames;

    /// Run detection on an RGB image. Boxes are in the image's own pixel space.
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
