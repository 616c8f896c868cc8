//! Zone-Aware Waste Detector
//!
//! This crate classifies waste in a single image and judges whether it was
//! dropped into the right disposal zone.
//!
//! # Architecture
//!
//! A request flows leaf-first through four core stages:
//!
//! 1. **Zone geometry** (`zone`): built-in left/right zones defined on a
//!    1280x720 reference frame, scaled to the actual image.
//! 2. **Normalization** (`normalize`): detector class ids mapped onto the
//!    canonical waste vocabulary, low-confidence and malformed boxes dropped.
//! 3. **Classification** (`classify`): one verdict per request, from either a
//!    user-drawn zone or the built-in zones.
//! 4. **Rendering** (`render`): zones and detection boxes drawn over the frame.
//!
//! # Module Structure
//!
//! - `detect`: detector backends (stub, tract ONNX) and model loading
//! - `storage`: detection log (SQLite, in-memory)
//! - `analytics`: aggregates over the detection log
//! - `pipeline`: request orchestration
//! - `context`: state shared by all requests
//! - `api`: HTTP server
//! - `config`: service configuration

pub mod analytics;
pub mod api;
pub mod classify;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod render;
pub mod storage;
pub mod zone;

pub use analytics::{analytics, Analytics};
pub use classify::{classify, Classification, Placement, WasteVerdict, ZoneMode, ZoneVerdict};
pub use config::{BackendKind, ModelSettings, WasteApiConfig};
pub use context::AppContext;
pub use detect::{DetectorBackend, LabelNames, ModelState, RawDetection, StubBackend};
pub use error::DetectError;
pub use normalize::{ClassMap, Detection, Normalizer, WasteType};
pub use pipeline::{detect_waste, DetectionResponse, Performance};
pub use render::Renderer;
pub use storage::{DetectionLogStore, DetectionRecord, InMemoryDetectionLog, SqliteDetectionLog};
pub use zone::{Rect, Zone, ZoneSet};
