use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::text::normalizer::Frontend;
use crate::{Result, TtsError};

/// Voice served by a model: the model's speaker index plus the vocoder that renders it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Speaker {
    pub speaker_id: u32,
    pub vocoder: String,
}

/// One `tts_models.<name>` entry of the model configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelConfig {
    #[serde(skip)]
    pub model_name: String,
    pub model_path: PathBuf,
    #[serde(default)]
    pub frontend: Frontend,
    pub speakers: BTreeMap<String, Speaker>,
    pub vocoders: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    tts_models: BTreeMap<String, ModelConfig>,
}

impl ModelConfig {
    /// Parse a configuration document and pick `model_name` from it.
    pub fn from_yaml_str(document: &str, model_name: &str) -> Result<Self> {
        let file: ModelConfigFile = serde_yaml::from_str(document)?;
        let mut config = file
            .tts_models
            .get(model_name)
            .cloned()
            .ok_or_else(|| {
                TtsError::Config(format!("model '{model_name}' not found in configuration"))
            })?;
        config.model_name = model_name.to_string();
        config.validate()?;
        Ok(config)
    }

    /// Speaker names in sorted order.
    pub fn speaker_names(&self) -> Vec<String> {
        self.speakers.keys().cloned().collect()
    }

    fn validate(&self) -> Result<()> {
        if self.speakers.is_empty() {
            return Err(TtsError::Config(format!(
                "model '{}' declares no speakers",
                self.model_name
            )));
        }
        for (name, speaker) in &self.speakers {
            if !self.vocoders.contains_key(&speaker.vocoder) {
                return Err(TtsError::Config(format!(
                    "speaker '{name}' references unknown vocoder '{}'",
                    speaker.vocoder
                )));
            }
        }
        Ok(())
    }
}

/// Load `model_name` from the YAML file at `path`.
pub fn read_model_config(path: impl AsRef<Path>, model_name: &str) -> Result<ModelConfig> {
    let path = path.as_ref();
    let document = std::fs::read_to_string(path)?;
    let config = ModelConfig::from_yaml_str(&document, model_name)?;
    info!(
        target: "synthesizer",
        model = %model_name,
        path = %path.display(),
        speakers = config.speakers.len(),
        frontend = %config.frontend,
        "Loaded model configuration"
    );
    Ok(config)
}

/// Tunables of the adaptive synthesis controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizerConfig {
    /// Operator-supplied capacity limit; 0 requests self-calibration
    pub max_input_length: usize,
    /// Capacity below which an overflow is reported instead of retried
    pub min_capacity: usize,
    /// Multiplier applied to the failing length on overflow
    pub shrink_factor: f32,
    pub min_speed: f32,
    pub max_speed: f32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            max_input_length: 0,
            min_capacity: 10,
            shrink_factor: 0.5,
            min_speed: 0.5,
            max_speed: 2.0,
        }
    }
}

impl SynthesizerConfig {
    pub fn with_max_input_length(mut self, max_input_length: usize) -> Self {
        self.max_input_length = max_input_length;
        self
    }

    pub fn with_min_capacity(mut self, min_capacity: usize) -> Self {
        self.min_capacity = min_capacity.max(1);
        self
    }
}
