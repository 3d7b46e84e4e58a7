use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{STATUS_INTERNAL, STATUS_TOO_LARGE, STATUS_UNPROCESSABLE};
use crate::{Result, TtsError};

/// Status code of a successful synthesis.
pub const STATUS_OK: u16 = 200;

/// Message reported when a success envelope carries no content or an internal error escapes.
pub const INTERNAL_ERROR_MESSAGE: &str = "Unknown internal error.";

/// Message reported when a segment stays too long even at the capacity floor.
pub const TOO_LONG_MESSAGE: &str = "Input contains sentences that are too long.";

/// Inbound synthesis request, decoded from the broker payload.
///
/// Reply destination and correlation id travel in the broker's message properties,
/// not in this body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub text: String,
    pub speaker: String,
    pub speed: f32,
}

impl Request {
    pub fn new(text: impl Into<String>, speaker: impl Into<String>, speed: f32) -> Self {
        Self {
            text: text.into(),
            speaker: speaker.into(),
            speed,
        }
    }

    /// Decode a JSON body. Any shape error is a validation failure.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| TtsError::Validation(format!("Error parsing input: {e}")))
    }
}

/// Audio plus the framing metadata the caller needs to align it with the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseContent {
    /// WAV file bytes, base64 on the wire
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub audio: Vec<u8>,
    pub text: String,
    pub normalized_text: String,
    pub duration_frames: Vec<u32>,
    pub sampling_rate: u32,
    pub win_length: u32,
    pub hop_length: u32,
}

fn to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Reply published for every delivery, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub status: Option<String>,
    pub content: Option<ResponseContent>,
}

impl Response {
    pub fn success(content: ResponseContent) -> Self {
        Self {
            status_code: STATUS_OK,
            status: Some("OK".to_string()),
            content: Some(content),
        }
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            status: Some(message.into()),
            content: None,
        }
    }

    pub fn internal_error() -> Self {
        Self::error(STATUS_INTERNAL, INTERNAL_ERROR_MESSAGE)
    }

    /// Error envelope for a failed request. Internal failures are reported generically.
    pub fn from_error(err: &TtsError) -> Self {
        let code = err.status_code();
        match (code, err) {
            (STATUS_INTERNAL, _) => Self::internal_error(),
            (STATUS_TOO_LARGE, _) => Self::error(code, TOO_LONG_MESSAGE),
            (STATUS_UNPROCESSABLE, TtsError::Validation(message)) => Self::error(code, message.clone()),
            _ => Self::error(code, err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK && self.content.is_some()
    }

    /// Enforce the success/content invariant: a 200 without content becomes a 500, and
    /// error envelopes never carry audio.
    pub fn sanitized(mut self) -> Self {
        if self.status_code == STATUS_OK && self.content.is_none() {
            self.status_code = STATUS_INTERNAL;
            self.status = Some(INTERNAL_ERROR_MESSAGE.to_string());
        } else if self.status_code != STATUS_OK {
            self.content = None;
        }
        self
    }

    /// Serialize to the JSON wire format.
    pub fn encode(self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.sanitized())?)
    }
}

impl From<TtsError> for Response {
    fn from(err: TtsError) -> Self {
        Response::from_error(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn content() -> ResponseContent {
        ResponseContent {
            audio: b"RIFF....WAVE".to_vec(),
            text: "Tere.".into(),
            normalized_text: " tere. ".into(),
            duration_frames: vec![43, 3, 4, 43],
            sampling_rate: 22050,
            win_length: 1024,
            hop_length: 256,
        }
    }

    #[test]
    fn success_encodes_audio_as_base64() {
        let bytes = Response::success(content()).encode().unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status_code"], 200);
        assert_eq!(json["content"]["audio"], "UklGRi4uLi5XQVZF");
        assert_eq!(json["content"]["duration_frames"][0], 43);
        assert_eq!(json["content"]["hop_length"], 256);

        let decoded: Response = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.content.unwrap().audio, b"RIFF....WAVE".to_vec());
    }

    #[test]
    fn success_without_content_is_forced_to_internal_error() {
        let response = Response {
            status_code: 200,
            status: None,
            content: None,
        };
        let json: Value = serde_json::from_slice(&response.encode().unwrap()).unwrap();
        assert_eq!(json["status_code"], 500);
        assert_eq!(json["status"], INTERNAL_ERROR_MESSAGE);
        assert!(json["content"].is_null());
    }

    #[test]
    fn error_envelopes_never_carry_audio() {
        let response = Response {
            status_code: 422,
            status: Some("bad".into()),
            content: Some(content()),
        };
        assert!(response.sanitized().content.is_none());
    }

    #[test]
    fn error_mapping_hides_internal_details() {
        let response = Response::from(TtsError::Inference("cuda: out of memory at 0x1f".into()));
        assert_eq!(response.status_code, 500);
        assert_eq!(response.status.as_deref(), Some(INTERNAL_ERROR_MESSAGE));

        let response = Response::from(TtsError::UnknownSpeaker("bob".into()));
        assert_eq!(response.status_code, 422);

        let response = Response::from(TtsError::SegmentTooLarge { length: 12, floor: 10 });
        assert_eq!(response.status_code, 413);
        assert_eq!(response.status.as_deref(), Some(TOO_LONG_MESSAGE));
    }

    #[test]
    fn request_decoding_reports_validation_errors() {
        let request = Request::from_slice(br#"{"text":"Tere.","speaker":"anu","speed":1.2}"#).unwrap();
        assert_eq!(request, Request::new("Tere.", "anu", 1.2));

        let err = Request::from_slice(br#"{"text":"Tere.","speaker":"anu"}"#).unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(err.to_string().contains("speed"), "{err}");

        let err = Request::from_slice(b"not json").unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(err.to_string().contains("Error parsing input"));
    }
}
