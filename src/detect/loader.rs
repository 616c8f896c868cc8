use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::config::{BackendKind, ModelSettings};
use crate::detect::backend::{DetectorBackend, LabelNames};
use crate::detect::backends::StubBackend;

/// Labels of the 4-class waste model.
pub fn waste_taxonomy_labels() -> LabelNames {
    ["glass", "metal", "paper", "plastic"]
        .iter()
        .enumerate()
        .map(|(id, name)| (id as u32, name.to_string()))
        .collect()
}

/// Read a labels file: one class name per line, line index is the class id.
///
/// Blank lines keep their index so ids stay aligned with the model output.
pub fn read_labels_file(path: &Path) -> Result<LabelNames> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    let labels: LabelNames = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(id, line)| (id as u32, line.trim().to_string()))
        .collect();
    if labels.is_empty() {
        return Err(anyhow!("labels file {} is empty", path.display()));
    }
    Ok(labels)
}

/// Outcome of loading the detector at startup.
///
/// `Unavailable` is kept rather than retried so that every request can report
/// "model unavailable" distinctly from "nothing detected".
#[derive(Clone)]
pub enum ModelState {
    Ready(Arc<dyn DetectorBackend>),
    Unavailable(String),
}

impl ModelState {
    pub fn ready<B: DetectorBackend + 'static>(backend: B) -> Self {
        ModelState::Ready(Arc::new(backend))
    }
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Ready(backend) => f.debug_tuple("Ready").field(&backend.name()).finish(),
            ModelState::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

/// Load the configured detector once.
///
/// The primary path is tried first, then each fallback path that exists on
/// disk. Load failures are logged and folded into `ModelState::Unavailable`.
pub fn load_detector(settings: &ModelSettings) -> ModelState {
    let labels = match &settings.labels_path {
        Some(path) => match read_labels_file(path) {
            Ok(labels) => labels,
            Err(err) => {
                log::error!("detector labels unavailable: {:#}", err);
                return ModelState::Unavailable(format!("{:#}", err));
            }
        },
        None => waste_taxonomy_labels(),
    };

    match settings.backend {
        BackendKind::Stub => {
            log::warn!("using stub detector backend; no objects will be detected");
            ModelState::ready(StubBackend::with_labels(labels))
        }
        BackendKind::Tract => load_model_file(settings, labels),
    }
}

fn candidate_paths(settings: &ModelSettings) -> Vec<PathBuf> {
    let mut paths = vec![settings.path.clone()];
    for path in &settings.fallback_paths {
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }
    paths
}

#[cfg(feature = "backend-tract")]
fn load_model_file(settings: &ModelSettings, labels: LabelNames) -> ModelState {
    use crate::detect::backends::{TractBackend, TractParams};

    let params = TractParams {
        input_size: settings.input_size,
        iou_threshold: settings.iou_threshold,
        ..TractParams::default()
    };
    let mut last_error = format!("model file {} not found", settings.path.display());
    for path in candidate_paths(settings) {
        if !path.exists() {
            log::warn!("model file {} not found, trying next candidate", path.display());
            continue;
        }
        match TractBackend::new(&path, labels.clone(), params) {
            Ok(backend) => {
                if let Err(err) = backend.warm_up() {
                    log::error!("detector at {} failed warm-up: {:#}", path.display(), err);
                    last_error = format!("{:#}", err);
                    continue;
                }
                log::info!(
                    "detector loaded from {} ({} classes: {})",
                    path.display(),
                    labels.len(),
                    labels.values().cloned().collect::<Vec<_>>().join(", ")
                );
                return ModelState::ready(backend);
            }
            Err(err) => {
                log::error!("failed to load detector from {}: {:#}", path.display(), err);
                last_error = format!("{:#}", err);
            }
        }
    }
    ModelState::Unavailable(last_error)
}

#[cfg(not(feature = "backend-tract"))]
const TRACT_DISABLED: &str = "built without the backend-tract feature";

#[cfg(not(feature = "backend-tract"))]
fn load_model_file(settings: &ModelSettings, _labels: LabelNames) -> ModelState {
    let tried = candidate_paths(settings)
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    log::error!(
        "backend=tract but this build was compiled with --no-default-features; \
         rebuild with --features backend-tract or set WASTE_DETECTOR_BACKEND=stub (model candidates: {})",
        tried
    );
    ModelState::Unavailable(TRACT_DISABLED.to_string())
}
