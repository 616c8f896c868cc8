mod backend;
mod backends;
mod loader;
mod result;

pub use backend::{DetectorBackend, LabelNames};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractParams};
pub use loader::{load_detector, read_labels_file, waste_taxonomy_labels, ModelState};
pub use result::RawDetection;
