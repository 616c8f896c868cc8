//! Application context built once at startup and shared by every request.

use std::sync::Arc;

use crate::config::WasteApiConfig;
use crate::detect::{load_detector, DetectorBackend, ModelState};
use crate::error::DetectError;
use crate::normalize::{ClassMap, Normalizer};
use crate::render::Renderer;
use crate::storage::{DetectionLogStore, SqliteDetectionLog};

/// Loaded detector together with the normalizer derived from its label set.
pub struct Detector {
    pub backend: Arc<dyn DetectorBackend>,
    pub normalizer: Normalizer,
}

pub struct AppContext {
    detector: Result<Detector, String>,
    renderer: Renderer,
    log_store: Option<Box<dyn DetectionLogStore>>,
}

impl AppContext {
    /// Context around an already loaded (or failed) detector, without a log
    /// sink and without captions.
    pub fn new(model: ModelState, confidence_threshold: f32) -> Self {
        let detector = match model {
            ModelState::Ready(backend) => {
                let class_map = ClassMap::from_labels(backend.label_names());
                log::info!(
                    "detector '{}' ready ({} classes, {} class table)",
                    backend.name(),
                    backend.label_names().len(),
                    if class_map.uses_primary_table() {
                        "waste"
                    } else {
                        "keyword"
                    }
                );
                Ok(Detector {
                    backend,
                    normalizer: Normalizer::new(class_map, confidence_threshold),
                })
            }
            ModelState::Unavailable(reason) => Err(reason),
        };
        Self {
            detector,
            renderer: Renderer::new(),
            log_store: None,
        }
    }

    /// Build everything the service needs from configuration.
    ///
    /// Nothing here is fatal: a missing model leaves `/detect` answering 500,
    /// and an unopenable log database leaves the service without a log sink.
    pub fn from_config(cfg: &WasteApiConfig) -> Self {
        let model = load_detector(&cfg.model);
        let mut ctx = Self::new(model, cfg.confidence_threshold);
        if let Some(path) = &cfg.font_path {
            let renderer = Renderer::with_font_file(path);
            if renderer.has_captions() {
                log::info!("captions rendered with {}", path.display());
            }
            ctx = ctx.with_renderer(renderer);
        }
        if let Some(path) = &cfg.log_db_path {
            match SqliteDetectionLog::open(&path.to_string_lossy()) {
                Ok(store) => {
                    log::info!("detection log at {}", path.display());
                    ctx = ctx.with_log_store(Box::new(store));
                }
                Err(err) => log::warn!(
                    "detection log {} unavailable, continuing without it: {:#}",
                    path.display(),
                    err
                ),
            }
        }
        ctx
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_log_store(mut self, store: Box<dyn DetectionLogStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    pub fn model_ready(&self) -> bool {
        self.detector.is_ok()
    }

    /// The loaded detector, or `ModelUnavailable`.
    pub fn detector(&self) -> Result<&Detector, DetectError> {
        self.detector.as_ref().map_err(|reason| {
            log::debug!("detector unavailable: {}", reason);
            DetectError::ModelUnavailable("Model not loaded".to_string())
        })
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn log_store(&self) -> Option<&dyn DetectionLogStore> {
        self.log_store.as_deref()
    }
}
