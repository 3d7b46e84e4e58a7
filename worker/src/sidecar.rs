//! Inference sidecar adapter.
//!
//! The neural model runs in a separate long-lived process speaking newline-delimited
//! JSON over stdin/stdout. One request line gets exactly one reply line:
//! `{"ok": ...}` or `{"error": {"kind": "resource_exhausted" | "failed", "message": ...}}`.
//! The model, every vocoder and the text converter share that process. Once the pipe
//! breaks every call fails with `InferenceError::Unavailable`.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tts_worker_core::text::TextConverter;
use tts_worker_core::{
    AcousticModel, Frontend, InferenceError, MelSpectrogram, ModelConfig, ModelSpec, Prediction,
    Vocoder,
};

use crate::error::{Result, WorkerError};

/// How to start the sidecar for one model.
#[derive(Clone, Debug)]
pub struct SidecarOptions {
    pub command: String,
    pub model_path: PathBuf,
    pub vocoders: BTreeMap<String, PathBuf>,
    pub frontend: Frontend,
}

impl SidecarOptions {
    pub fn new(command: impl Into<String>, model: &ModelConfig) -> Self {
        Self {
            command: command.into(),
            model_path: model.model_path.clone(),
            vocoders: model.vocoders.clone(),
            frontend: model.frontend,
        }
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--model-path").arg(&self.model_path);
        cmd.arg("--frontend").arg(self.frontend.as_str());
        for (name, path) in &self.vocoders {
            cmd.arg("--vocoder")
                .arg(format!("{name}={}", path.display()));
        }
        cmd
    }
}

#[derive(Serialize, Debug)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SidecarRequest<'a> {
    Describe,
    Predict {
        text: &'a str,
        speed: f32,
        speaker_id: u32,
    },
    Vocode {
        vocoder: &'a str,
        mel: &'a MelSpectrogram,
    },
    Convert {
        text: &'a str,
    },
}

impl SidecarRequest<'_> {
    fn op(&self) -> &'static str {
        match self {
            SidecarRequest::Describe => "describe",
            SidecarRequest::Predict { .. } => "predict",
            SidecarRequest::Vocode { .. } => "vocode",
            SidecarRequest::Convert { .. } => "convert",
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
enum SidecarReply {
    Ok(serde_json::Value),
    Error(SidecarFault),
}

#[derive(Deserialize, Debug)]
struct SidecarFault {
    kind: String,
    #[serde(default)]
    message: String,
}

impl SidecarFault {
    fn into_inference_error(self) -> InferenceError {
        match self.kind.as_str() {
            "resource_exhausted" => InferenceError::CapacityExceeded(self.message),
            _ => InferenceError::Failed(self.message),
        }
    }
}

#[derive(Deserialize)]
struct VocodeReply {
    audio: Vec<i16>,
}

#[derive(Deserialize)]
struct ConvertReply {
    text: String,
}

struct SidecarProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Set once the pipe breaks; the process is never talked to again
    lost: Option<String>,
}

impl SidecarProcess {
    fn round_trip(&mut self, line: &str) -> std::result::Result<String, InferenceError> {
        if let Some(reason) = &self.lost {
            return Err(InferenceError::Unavailable(reason.clone()));
        }
        match self.exchange(line) {
            Ok(reply) => Ok(reply),
            Err(reason) => {
                warn!(target: "sidecar", reason = %reason, "Inference sidecar lost");
                self.lost = Some(reason.clone());
                Err(InferenceError::Unavailable(reason))
            }
        }
    }

    fn exchange(&mut self, line: &str) -> std::result::Result<String, String> {
        let broken = |e: std::io::Error| format!("inference sidecar pipe broken: {e}");
        self.stdin.write_all(line.as_bytes()).map_err(broken)?;
        self.stdin.write_all(b"\n").map_err(broken)?;
        self.stdin.flush().map_err(broken)?;

        let mut reply = String::new();
        let read = self.stdout.read_line(&mut reply).map_err(broken)?;
        if read == 0 {
            return Err("inference sidecar closed its output".to_string());
        }
        Ok(reply)
    }
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(target: "sidecar", error = %e, "Sidecar already stopped");
        }
        let _ = self.child.wait();
    }
}

/// Shared handle to the sidecar process.
#[derive(Clone)]
pub struct Sidecar {
    process: Arc<Mutex<SidecarProcess>>,
}

impl Sidecar {
    pub fn spawn(options: &SidecarOptions) -> Result<Self> {
        info!(
            target: "sidecar",
            command = %options.command,
            model_path = %options.model_path.display(),
            vocoders = options.vocoders.len(),
            "Starting inference sidecar"
        );
        Self::from_command(options.to_command())
    }

    /// Start an arbitrary command as the sidecar. Its stderr is inherited.
    pub fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| WorkerError::Sidecar(format!("failed to start {:?}: {e}", cmd.get_program())))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Sidecar("sidecar stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Sidecar("sidecar stdout not captured".into()))?;

        Ok(Self {
            process: Arc::new(Mutex::new(SidecarProcess {
                child,
                stdin,
                stdout: BufReader::new(stdout),
                lost: None,
            })),
        })
    }

    fn call<T: DeserializeOwned>(
        &self,
        request: &SidecarRequest<'_>,
    ) -> std::result::Result<T, InferenceError> {
        let line = serde_json::to_string(request)
            .map_err(|e| InferenceError::Failed(format!("cannot encode sidecar request: {e}")))?;
        let reply = {
            let mut process = self
                .process
                .lock()
                .map_err(|_| InferenceError::Unavailable("sidecar lock poisoned".to_string()))?;
            process.round_trip(&line)?
        };

        let reply: SidecarReply = serde_json::from_str(&reply).map_err(|e| {
            InferenceError::Failed(format!("malformed sidecar reply to {}: {e}", request.op()))
        })?;
        match reply {
            SidecarReply::Ok(value) => serde_json::from_value(value).map_err(|e| {
                InferenceError::Failed(format!("unexpected sidecar payload for {}: {e}", request.op()))
            }),
            SidecarReply::Error(fault) => {
                debug!(target: "sidecar", op = request.op(), kind = %fault.kind, message = %fault.message, "Sidecar reported an error");
                Err(fault.into_inference_error())
            }
        }
    }

    /// Ask the model for its static properties.
    pub fn describe(&self) -> Result<ModelSpec> {
        let spec: ModelSpec = self
            .call(&SidecarRequest::Describe)
            .map_err(|e| WorkerError::Sidecar(format!("describe failed: {e}")))?;
        info!(
            target: "sidecar",
            sampling_rate = spec.sampling_rate,
            hop_length = spec.hop_length,
            max_input_length = spec.max_input_length(),
            "Inference sidecar ready"
        );
        Ok(spec)
    }

    pub fn model(&self) -> Result<SidecarModel> {
        Ok(SidecarModel {
            spec: self.describe()?,
            sidecar: self.clone(),
        })
    }

    pub fn vocoder(&self, name: impl Into<String>) -> SidecarVocoder {
        SidecarVocoder {
            name: name.into(),
            sidecar: self.clone(),
        }
    }

    pub fn converter(&self) -> SidecarConverter {
        SidecarConverter {
            sidecar: self.clone(),
        }
    }
}

pub struct SidecarModel {
    sidecar: Sidecar,
    spec: ModelSpec,
}

impl AcousticModel for SidecarModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn predict(
        &mut self,
        text: &str,
        speed: f32,
        speaker_id: u32,
    ) -> std::result::Result<Prediction, InferenceError> {
        self.sidecar.call(&SidecarRequest::Predict {
            text,
            speed,
            speaker_id,
        })
    }
}

pub struct SidecarVocoder {
    sidecar: Sidecar,
    name: String,
}

impl Vocoder for SidecarVocoder {
    fn vocode(&mut self, mel: &MelSpectrogram) -> std::result::Result<Vec<i16>, InferenceError> {
        let reply: VocodeReply = self.sidecar.call(&SidecarRequest::Vocode {
            vocoder: &self.name,
            mel,
        })?;
        Ok(reply.audio)
    }
}

pub struct SidecarConverter {
    sidecar: Sidecar,
}

impl TextConverter for SidecarConverter {
    fn convert(&self, text: &str) -> std::result::Result<String, String> {
        match self.sidecar.call::<ConvertReply>(&SidecarRequest::Convert { text }) {
            Ok(reply) => Ok(reply.text),
            Err(e) => {
                warn!(target: "sidecar", error = %e, "Conversion request failed");
                Err(e.to_string())
            }
        }
    }
}
