// Error types shared by the text pipeline and the synthesis controller
use thiserror::Error;

/// Status code reported for malformed or semantically invalid requests.
pub const STATUS_UNPROCESSABLE: u16 = 422;
/// Status code reported when a segment cannot be synthesized even at the capacity floor.
pub const STATUS_TOO_LARGE: u16 = 413;
/// Status code reported for everything the caller cannot fix.
pub const STATUS_INTERNAL: u16 = 500;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown speaker: {0}")]
    UnknownSpeaker(String),

    #[error("Segment of {length} characters cannot be synthesized (capacity floor is {floor})")]
    SegmentTooLarge { length: usize, floor: usize },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Audio encoding error: {0}")]
    Audio(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TtsError {
    /// Wire status code for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            TtsError::Validation(_) | TtsError::UnknownSpeaker(_) => STATUS_UNPROCESSABLE,
            TtsError::SegmentTooLarge { .. } => STATUS_TOO_LARGE,
            _ => STATUS_INTERNAL,
        }
    }

    /// Whether the process can no longer serve any request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TtsError::BackendUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, TtsError>;
