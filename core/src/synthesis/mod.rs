//! Adaptive synthesis controller.
//!
//! Turns a block of text into bounded-size inference calls: sentence segmentation,
//! normalization, capacity-aware splitting, prediction and vocoding, then WAV assembly
//! with half-second silences around every sentence. A capacity overflow from the model
//! shrinks the learned limit and reruns the sentence; the smaller limit is kept for the
//! rest of the process lifetime.

pub mod capacity;
pub mod wav;

pub use capacity::CapacityLimit;
pub use wav::encode_wav;

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{SynthesizerConfig, Speaker};
use crate::envelope::{Request, Response, ResponseContent};
use crate::inference::{AcousticModel, InferenceError, ModelSpec, Vocoder};
use crate::text::normalizer::{Frontend, TextConverter, TextNormalizer};
use crate::text::sentences::{RuleSentenceTokenizer, SentenceTokenizer};
use crate::text::splitter::split_segment;
use crate::{Result, TtsError};

static QUOTES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[«»“„]").expect("quote pattern"));

/// Anything that turns a decoded request into a reply.
pub trait RequestHandler: Send {
    /// Every per-request failure is an error reply. `Err` means the handler cannot serve
    /// any further request and the delivery must go back to the queue.
    fn handle(&mut self, request: Request) -> Result<Response>;
}

/// Output of one sentence, committed to the request accumulators only on success.
#[derive(Debug, Default)]
struct SentenceOutput {
    samples: Vec<i16>,
    durations: Vec<u32>,
    text: String,
}

/// Why a single attempt at a sentence did not complete.
enum AttemptError {
    Overflow { attempted_len: usize, message: String },
    Failed(String),
    Unavailable(String),
}

pub struct Synthesizer {
    model: Box<dyn AcousticModel>,
    vocoders: HashMap<String, Box<dyn Vocoder>>,
    speakers: BTreeMap<String, Speaker>,
    normalizer: TextNormalizer,
    tokenizer: Box<dyn SentenceTokenizer>,
    spec: ModelSpec,
    config: SynthesizerConfig,
    capacity: CapacityLimit,
    needs_calibration: bool,
    silence: Vec<i16>,
    silence_len: u32,
}

impl Synthesizer {
    pub fn new(
        model: Box<dyn AcousticModel>,
        vocoders: HashMap<String, Box<dyn Vocoder>>,
        speakers: BTreeMap<String, Speaker>,
        frontend: Frontend,
        config: SynthesizerConfig,
    ) -> Result<Self> {
        if speakers.is_empty() {
            return Err(TtsError::Config("no speakers configured".to_string()));
        }
        for (name, speaker) in &speakers {
            if !vocoders.contains_key(&speaker.vocoder) {
                return Err(TtsError::Config(format!(
                    "vocoder '{}' for speaker '{name}' is not loaded",
                    speaker.vocoder
                )));
            }
        }

        let spec = model.spec().clone();
        let architectural_max = spec.max_input_length();
        if architectural_max == 0 {
            return Err(TtsError::Config(
                "model reports no room for input characters".to_string(),
            ));
        }

        let configured = config.max_input_length;
        let needs_calibration = configured == 0 || configured > architectural_max;
        if configured > architectural_max {
            warn!(
                target: "synthesizer",
                configured,
                architectural_max,
                "Configured max input length exceeds the model limit; calibrating instead"
            );
        }
        let initial = if needs_calibration { architectural_max } else { configured };
        let capacity = CapacityLimit::new(initial, config.min_capacity, config.shrink_factor);

        let silence = vec![0i16; spec.silence_samples()];
        let silence_len = spec.silence_frames();
        let normalizer = TextNormalizer::new(spec.alphabet(), frontend);

        debug!(
            target: "synthesizer",
            sampling_rate = spec.sampling_rate,
            hop_length = spec.hop_length,
            win_length = spec.win_length,
            style_token_len = spec.style_token_len,
            architectural_max,
            capacity = capacity.current(),
            "Model properties"
        );
        info!(target: "synthesizer", speakers = speakers.len(), frontend = %frontend, "Synthesizer initialized");

        Ok(Self {
            model,
            vocoders,
            speakers,
            normalizer,
            tokenizer: Box::new(RuleSentenceTokenizer::new()),
            spec,
            config,
            capacity,
            needs_calibration,
            silence,
            silence_len,
        })
    }

    pub fn with_converter(mut self, converter: Box<dyn TextConverter>) -> Self {
        self.normalizer = self.normalizer.with_converter(converter);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn SentenceTokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn speaker_names(&self) -> Vec<String> {
        self.speakers.keys().cloned().collect()
    }

    /// Current learned capacity limit in characters.
    pub fn capacity_limit(&self) -> usize {
        self.capacity.current()
    }

    pub fn needs_calibration(&self) -> bool {
        self.needs_calibration
    }

    /// Discover a safe capacity by synthesizing a probe at the architectural maximum and
    /// letting the overflow recovery shrink the limit. Returns the adopted limit.
    pub fn calibrate(&mut self) -> Result<usize> {
        let architectural_max = self.spec.max_input_length();
        let Some(letter) = self.normalizer.alphabet().probe_letter() else {
            warn!(target: "calibration", "Alphabet has no letters; keeping the architectural limit");
            self.needs_calibration = false;
            return Ok(self.capacity.current());
        };
        let probe = probe_text(letter, architectural_max);
        let Some(speaker) = self.speakers.values().next().cloned() else {
            return Err(TtsError::Config("no speakers configured".to_string()));
        };

        info!(target: "calibration", probe_len = architectural_max, "Calibrating max input length");
        let started = Instant::now();
        self.synthesize_sentence(&probe, &speaker, 1.0)?;
        self.needs_calibration = false;

        let capacity = self.capacity.current();
        info!(
            target: "calibration",
            capacity,
            elapsed_s = %format!("{:.3}", started.elapsed().as_secs_f64()),
            "Calibration finished"
        );
        Ok(capacity)
    }

    /// Validate and synthesize one request.
    pub fn process_request(&mut self, request: &Request) -> Result<ResponseContent> {
        info!(target: "synthesizer", speaker = %request.speaker, speed = request.speed, "Request received");
        self.validate(request)?;
        self.synthesize(&request.text, &request.speaker, request.speed)
    }

    fn validate(&self, request: &Request) -> Result<()> {
        if request.text.trim().is_empty() {
            return Err(TtsError::Validation(
                "Error parsing input: text must not be empty".to_string(),
            ));
        }
        if !self.speakers.contains_key(&request.speaker) {
            return Err(TtsError::UnknownSpeaker(request.speaker.clone()));
        }
        let speed = request.speed;
        if !speed.is_finite() || speed < self.config.min_speed || speed > self.config.max_speed {
            return Err(TtsError::Validation(format!(
                "Error parsing input: speed must be between {} and {}",
                self.config.min_speed, self.config.max_speed
            )));
        }
        Ok(())
    }

    /// Synthesize `text` with the given speaker. Assumes a validated request.
    pub fn synthesize(&mut self, text: &str, speaker: &str, speed: f32) -> Result<ResponseContent> {
        let speaker = self
            .speakers
            .get(speaker)
            .cloned()
            .ok_or_else(|| TtsError::UnknownSpeaker(speaker.to_string()))?;

        let unified = QUOTES.replace_all(text, "\"");
        let sentences = self.tokenizer.sentences(&unified);

        let mut waveform: Vec<i16> = Vec::new();
        let mut durations: Vec<u32> = Vec::new();
        let mut normalized_text = String::new();

        for (i, sentence) in sentences.iter().enumerate() {
            waveform.extend_from_slice(&self.silence);
            durations.push(self.silence_len);
            normalized_text.push(' ');

            debug!(target: "synthesizer", index = i, chars = sentence.chars().count(), sentence = %sentence, "Original sentence");
            let normalized = self.normalizer.normalize(sentence);
            debug!(target: "synthesizer", index = i, chars = normalized.chars().count(), sentence = %normalized, "Cleaned sentence");

            if normalized.is_empty() {
                continue;
            }

            let output = self.synthesize_sentence(&normalized, &speaker, speed)?;
            waveform.extend_from_slice(&output.samples);
            durations.extend_from_slice(&output.durations);
            normalized_text.push_str(&output.text);
        }

        waveform.extend_from_slice(&self.silence);
        durations.push(self.silence_len);
        normalized_text.push(' ');

        let audio = encode_wav(&waveform, self.spec.sampling_rate)?;

        Ok(ResponseContent {
            audio,
            text: text.to_string(),
            normalized_text,
            duration_frames: durations,
            sampling_rate: self.spec.sampling_rate,
            win_length: self.spec.win_length,
            hop_length: self.spec.hop_length,
        })
    }

    /// Run one normalized sentence, shrinking the capacity and starting over on overflow.
    fn synthesize_sentence(
        &mut self,
        normalized: &str,
        speaker: &Speaker,
        speed: f32,
    ) -> Result<SentenceOutput> {
        loop {
            let limit = self.capacity.current();
            let inputs = if normalized.chars().count() > limit {
                let parts = split_segment(normalized, limit);
                debug!(target: "synthesizer", parts = parts.len(), limit, "Sentence split");
                parts
            } else {
                vec![normalized.to_string()]
            };

            match self.attempt(&inputs, speaker, speed) {
                Ok(output) => return Ok(output),
                Err(AttemptError::Failed(message)) => return Err(TtsError::Inference(message)),
                Err(AttemptError::Unavailable(message)) => {
                    return Err(TtsError::BackendUnavailable(message))
                }
                Err(AttemptError::Overflow {
                    attempted_len,
                    message,
                }) => {
                    let previous = self.capacity.current();
                    match self.capacity.shrink(attempted_len) {
                        Some(next) => warn!(
                            target: "synthesizer",
                            previous,
                            next,
                            attempted_len,
                            error = %message,
                            "Synthesis exhausted resources; reducing max input length and retrying"
                        ),
                        None => {
                            warn!(
                                target: "synthesizer",
                                attempted_len,
                                floor = self.capacity.floor(),
                                "Segment too long even at the capacity floor"
                            );
                            return Err(TtsError::SegmentTooLarge {
                                length: attempted_len,
                                floor: self.capacity.floor(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// One pass over the sub-segments of a sentence. Nothing is committed on failure.
    fn attempt(
        &mut self,
        inputs: &[String],
        speaker: &Speaker,
        speed: f32,
    ) -> std::result::Result<SentenceOutput, AttemptError> {
        let vocoder = self.vocoders.get_mut(&speaker.vocoder).ok_or_else(|| {
            AttemptError::Failed(format!("vocoder '{}' is not loaded", speaker.vocoder))
        })?;
        let mut output = SentenceOutput::default();

        for input in inputs {
            let attempted_len = input.chars().count();
            let classify = |err: InferenceError| match err {
                InferenceError::CapacityExceeded(message) => AttemptError::Overflow {
                    attempted_len,
                    message,
                },
                InferenceError::Failed(message) => AttemptError::Failed(message),
                InferenceError::Unavailable(message) => AttemptError::Unavailable(message),
            };

            let prediction = self
                .model
                .predict(input, speed, speaker.speaker_id)
                .map_err(classify)?;
            debug!(
                target: "synthesizer",
                frames = prediction.mel.frames,
                bins = prediction.mel.bins,
                "Predicted mel-spectrogram dimensions"
            );
            output
                .durations
                .extend(prediction.duration_frames(self.spec.style_token_len));

            // empty spectrograms are not sent to the vocoder
            if !prediction.mel.is_empty() {
                let samples = vocoder.vocode(&prediction.mel).map_err(classify)?;
                output.samples.extend_from_slice(&samples);
            }
        }
        output.text = inputs.concat();
        Ok(output)
    }
}

impl RequestHandler for Synthesizer {
    fn handle(&mut self, request: Request) -> Result<Response> {
        match self.process_request(&request) {
            Ok(content) => Ok(Response::success(content)),
            Err(err) if err.is_fatal() => {
                error!(target: "synthesizer", error = %err, "Inference backend lost");
                Err(err)
            }
            Err(err) => {
                match err.status_code() {
                    500 => error!(target: "synthesizer", error = %err, "Synthesis failed"),
                    _ => warn!(target: "synthesizer", error = %err, "Request rejected"),
                }
                Ok(Response::from_error(&err))
            }
        }
    }
}

/// Repeating four-letter words trimmed to exactly `len` characters.
fn probe_text(letter: char, len: usize) -> String {
    let word: String = std::iter::repeat(letter).take(4).collect();
    let mut probe = String::with_capacity(len * letter.len_utf8());
    while probe.chars().count() < len {
        if !probe.is_empty() {
            probe.push(' ');
        }
        probe.push_str(&word);
    }
    probe.chars().take(len).collect()
}
