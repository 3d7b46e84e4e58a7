// TTS Worker Core Library
// Text pipeline, adaptive synthesis controller and reply envelope

pub mod config;
pub mod envelope;
pub mod error;
pub mod inference;
pub mod synthesis;
pub mod text;

// Export core types
pub use config::{read_model_config, ModelConfig, Speaker, SynthesizerConfig};
pub use envelope::{Request, Response, ResponseContent};
pub use error::{Result, TtsError};
pub use inference::{AcousticModel, InferenceError, MelSpectrogram, ModelSpec, Prediction, Vocoder};
pub use synthesis::{CapacityLimit, RequestHandler, Synthesizer};
pub use text::{Alphabet, Frontend, TextConverter};
