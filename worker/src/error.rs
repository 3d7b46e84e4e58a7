// Error types for the broker consumer and the inference sidecar
use thiserror::Error;
use tts_worker_core::TtsError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sidecar error: {0}")]
    Sidecar(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] TtsError),
}

impl WorkerError {
    /// Whether the worker must stop consuming instead of reconnecting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Core(e) if e.is_fatal())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
