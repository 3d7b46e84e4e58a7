//! Interfaces to the opaque inference capability.
//!
//! The acoustic model turns normalized text into a mel spectrogram plus per-token
//! durations; a vocoder turns a spectrogram into 16-bit PCM. Both may signal that the
//! input exceeded available execution resources, which the synthesis controller absorbs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::normalizer::Alphabet;

/// Failure signalled by the acoustic model or a vocoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The input exceeded available execution resources. Recoverable with a shorter input.
    #[error("resource exhausted: {0}")]
    CapacityExceeded(String),

    #[error("inference failed: {0}")]
    Failed(String),

    /// The inference backend is gone. No later call can succeed.
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),
}

impl InferenceError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, InferenceError::CapacityExceeded(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, InferenceError::Unavailable(_))
    }
}

/// Static properties the acoustic model reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub sampling_rate: u32,
    pub hop_length: u32,
    pub win_length: u32,
    /// Characters the model was trained on
    pub alphabet: String,
    /// Maximum encoder positions, including the style-token prefix
    pub encoder_max_position_encoding: usize,
    /// Number of style-token positions the model prepends to every input
    #[serde(default)]
    pub style_token_len: usize,
}

impl ModelSpec {
    /// Largest number of text characters the architecture can accept in one call.
    pub fn max_input_length(&self) -> usize {
        self.encoder_max_position_encoding
            .saturating_sub(self.style_token_len)
    }

    pub fn alphabet(&self) -> Alphabet {
        Alphabet::from(self.alphabet.as_str())
    }

    /// Length in samples of one inter-sentence silence: half a second rounded down to a
    /// whole number of hops.
    pub fn silence_samples(&self) -> usize {
        let half = (self.sampling_rate / 2) as usize;
        let hop = self.hop_length.max(1) as usize;
        half - half % hop
    }

    /// Length in frames of one inter-sentence silence.
    pub fn silence_frames(&self) -> u32 {
        (self.silence_samples() / self.hop_length.max(1) as usize) as u32
    }
}

/// Row-major mel spectrogram: `frames` rows of `bins` values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MelSpectrogram {
    pub frames: usize,
    pub bins: usize,
    pub data: Vec<f32>,
}

impl MelSpectrogram {
    pub fn new(frames: usize, bins: usize, data: Vec<f32>) -> Self {
        Self { frames, bins, data }
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.data.is_empty()
    }
}

/// Output of one acoustic model invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub mel: MelSpectrogram,
    /// Predicted duration per input position, style-token prefix included
    pub durations: Vec<f32>,
}

impl Prediction {
    /// Per-character durations in frames: the style-token prefix is dropped and the rest
    /// rounded half-to-even.
    pub fn duration_frames(&self, style_token_len: usize) -> Vec<u32> {
        self.durations
            .iter()
            .skip(style_token_len)
            .map(|d| d.round_ties_even().max(0.0) as u32)
            .collect()
    }
}

/// Text to spectrogram.
pub trait AcousticModel: Send {
    fn spec(&self) -> &ModelSpec;

    fn predict(
        &mut self,
        text: &str,
        speed: f32,
        speaker_id: u32,
    ) -> Result<Prediction, InferenceError>;
}

/// Spectrogram to 16-bit PCM.
pub trait Vocoder: Send {
    fn vocode(&mut self, mel: &MelSpectrogram) -> Result<Vec<i16>, InferenceError>;
}
