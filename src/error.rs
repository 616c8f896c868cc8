use thiserror::Error;

/// Request-level failure of a detection call.
///
/// Each variant maps onto one HTTP status; the message is what the client sees
/// in the `detail` field.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Malformed upload or detection zone. Client error.
    #[error("{0}")]
    Input(String),
    /// No detector was loaded at startup.
    #[error("{0}")]
    ModelUnavailable(String),
    /// The detector ran and failed.
    #[error("Detection failed: {0}")]
    Inference(String),
}

impl DetectError {
    pub fn input(msg: impl Into<String>) -> Self {
        DetectError::Input(msg.into())
    }

    pub fn status(&self) -> u16 {
        match self {
            DetectError::Input(_) => 400,
            DetectError::ModelUnavailable(_) | DetectError::Inference(_) => 500,
        }
    }
}

impl From<anyhow::Error> for DetectError {
    fn from(err: anyhow::Error) -> Self {
        DetectError::Inference(format!("{:#}", err))
    }
}
