use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8008";
const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MODEL_PATH: &str = "model/waste.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Deserialize, Default)]
struct WasteApiConfigFile {
    confidence_threshold: Option<f32>,
    api: Option<ApiConfigFile>,
    model: Option<ModelConfigFile>,
    log: Option<LogConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_request_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    fallback_paths: Option<Vec<PathBuf>>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct LogConfigFile {
    db_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    font_path: Option<PathBuf>,
}

/// Which detector implementation the service loads at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// ONNX model through tract (feature `backend-tract`).
    Tract,
    /// Scripted detector that never finds anything.
    Stub,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" | "onnx" => Ok(BackendKind::Tract),
            "stub" => Ok(BackendKind::Stub),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected 'tract' or 'stub'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WasteApiConfig {
    pub api_addr: String,
    pub max_request_bytes: usize,
    pub confidence_threshold: f32,
    pub model: ModelSettings,
    pub log_db_path: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: BackendKind,
    pub path: PathBuf,
    pub fallback_paths: Vec<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
    pub iou_threshold: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Tract,
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            fallback_paths: Vec::new(),
            labels_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl Default for WasteApiConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            model: ModelSettings::default(),
            log_db_path: None,
            font_path: None,
        }
    }
}

impl WasteApiConfig {
    /// Config from the file named by `WASTE_CONFIG` (if any) plus env overrides.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("WASTE_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`WasteApiConfig::load`] but with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = path.map(read_config_file).transpose()?;
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WasteApiConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let api = file.api.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let backend = match model.backend.as_deref() {
            Some(name) => name.parse()?,
            None => defaults.model.backend,
        };
        Ok(Self {
            api_addr: api.addr.unwrap_or(defaults.api_addr),
            max_request_bytes: api.max_request_bytes.unwrap_or(defaults.max_request_bytes),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            model: ModelSettings {
                backend,
                path: model.path.unwrap_or(defaults.model.path),
                fallback_paths: model.fallback_paths.unwrap_or_default(),
                labels_path: model.labels_path,
                input_size: model.input_size.unwrap_or(defaults.model.input_size),
                iou_threshold: model.iou_threshold.unwrap_or(defaults.model.iou_threshold),
            },
            log_db_path: file.log.and_then(|log| log.db_path),
            font_path: file.render.and_then(|render| render.font_path),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("WASTE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(bytes) = non_empty_env("WASTE_MAX_REQUEST_BYTES") {
            self.max_request_bytes = bytes.parse().map_err(|_| {
                anyhow!("WASTE_MAX_REQUEST_BYTES must be an integer number of bytes")
            })?;
        }
        if let Some(threshold) = non_empty_env("CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("CONFIDENCE_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(backend) = non_empty_env("WASTE_DETECTOR_BACKEND") {
            self.model.backend = backend.parse()?;
        }
        if let Some(path) = non_empty_env("MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(paths) = non_empty_env("MODEL_FALLBACK_PATHS") {
            self.model.fallback_paths = split_csv(&paths).into_iter().map(PathBuf::from).collect();
        }
        if let Some(path) = non_empty_env("WASTE_LABELS_PATH") {
            self.model.labels_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("WASTE_DB_PATH") {
            self.log_db_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("WASTE_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if !(self.model.iou_threshold > 0.0 && self.model.iou_threshold <= 1.0) {
            return Err(anyhow!(
                "IoU threshold must be within (0, 1], got {}",
                self.model.iou_threshold
            ));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        if self.max_request_bytes == 0 {
            return Err(anyhow!("max request bytes must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WasteApiConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
