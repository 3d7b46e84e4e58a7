// Hand-rolled inference fakes shared by the controller tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tts_worker_core::{
    AcousticModel, Frontend, InferenceError, MelSpectrogram, ModelSpec, Prediction, Speaker,
    Synthesizer, SynthesizerConfig, Vocoder,
};

pub const ALPHABET: &str = "abcdefghijklmnopqrsšzžtuvwõäöüxy .,!?-\"";
pub const SAMPLING_RATE: u32 = 22050;
pub const HOP_LENGTH: u32 = 256;
pub const STYLE_TOKENS: usize = 2;
/// 11025 - 11025 % 256 samples, in frames
pub const SILENCE_FRAMES: u32 = 43;
pub const SILENCE_SAMPLES: usize = 11008;

pub fn model_spec() -> ModelSpec {
    ModelSpec {
        sampling_rate: SAMPLING_RATE,
        hop_length: HOP_LENGTH,
        win_length: 1024,
        alphabet: ALPHABET.to_string(),
        encoder_max_position_encoding: 1000 + STYLE_TOKENS,
        style_token_len: STYLE_TOKENS,
    }
}

/// Observations shared between a test and the fakes it hands to the controller.
#[derive(Clone, Default)]
pub struct Recorder {
    /// Character length of every `predict` input, in call order
    pub predict_lengths: Arc<Mutex<Vec<usize>>>,
    pub vocode_calls: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn lengths(&self) -> Vec<usize> {
        self.predict_lengths.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.predict_lengths.lock().unwrap().clear();
        self.vocode_calls.store(0, Ordering::SeqCst);
    }

    pub fn vocoded(&self) -> usize {
        self.vocode_calls.load(Ordering::SeqCst)
    }
}

/// Acoustic model producing one frame per input character.
pub struct FakeModel {
    spec: ModelSpec,
    recorder: Recorder,
    /// Inputs longer than this overflow
    pub exhaust_above: usize,
    /// Call indices (0-based) that overflow regardless of length
    pub exhaust_on_calls: Vec<usize>,
    pub fail_hard: bool,
    /// Behave like a backend process that has exited
    pub gone: bool,
    pub empty_mel: bool,
}

impl FakeModel {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            spec: model_spec(),
            recorder,
            exhaust_above: usize::MAX,
            exhaust_on_calls: Vec::new(),
            fail_hard: false,
            gone: false,
            empty_mel: false,
        }
    }
}

impl AcousticModel for FakeModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn predict(
        &mut self,
        text: &str,
        _speed: f32,
        _speaker_id: u32,
    ) -> Result<Prediction, InferenceError> {
        let len = text.chars().count();
        let call = {
            let mut lengths = self.recorder.predict_lengths.lock().unwrap();
            lengths.push(len);
            lengths.len() - 1
        };
        if self.gone {
            return Err(InferenceError::Unavailable("backend closed its output".into()));
        }
        if self.fail_hard {
            return Err(InferenceError::Failed("model crashed".into()));
        }
        if len > self.exhaust_above || self.exhaust_on_calls.contains(&call) {
            return Err(InferenceError::CapacityExceeded(format!("OOM at {len}")));
        }

        let frames = if self.empty_mel { 0 } else { len };
        let mut durations = vec![7.0; STYLE_TOKENS];
        durations.extend(std::iter::repeat(1.0).take(len));
        Ok(Prediction {
            mel: MelSpectrogram::new(frames, 80, vec![0.0; frames * 80]),
            durations,
        })
    }
}

/// Vocoder emitting one hop of constant samples per frame.
pub struct FakeVocoder {
    recorder: Recorder,
}

impl Vocoder for FakeVocoder {
    fn vocode(&mut self, mel: &MelSpectrogram) -> Result<Vec<i16>, InferenceError> {
        self.recorder.vocode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![100; mel.frames * HOP_LENGTH as usize])
    }
}

pub fn speakers() -> BTreeMap<String, Speaker> {
    let mut speakers = BTreeMap::new();
    speakers.insert(
        "anu".to_string(),
        Speaker {
            speaker_id: 0,
            vocoder: "hifigan".to_string(),
        },
    );
    speakers.insert(
        "mari".to_string(),
        Speaker {
            speaker_id: 1,
            vocoder: "hifigan".to_string(),
        },
    );
    speakers
}

pub fn synthesizer(model: FakeModel, recorder: &Recorder, config: SynthesizerConfig) -> Synthesizer {
    let mut vocoders: HashMap<String, Box<dyn Vocoder>> = HashMap::new();
    vocoders.insert(
        "hifigan".to_string(),
        Box::new(FakeVocoder {
            recorder: recorder.clone(),
        }),
    );
    Synthesizer::new(Box::new(model), vocoders, speakers(), Frontend::Plain, config)
        .expect("synthesizer")
}

pub fn config_with_capacity(capacity: usize) -> SynthesizerConfig {
    SynthesizerConfig::default().with_max_input_length(capacity)
}
