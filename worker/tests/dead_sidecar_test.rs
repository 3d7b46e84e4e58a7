#![cfg(unix)]

mod common;

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::process::Command;

use common::{message, Event, RecordingResponder};
use tts_worker::{Dispatcher, Sidecar};
use tts_worker_core::{Frontend, Speaker, Synthesizer, SynthesizerConfig, Vocoder};

// Answers the startup describe, then exits like a crashed inference process
const SHORT_LIVED_SIDECAR: &str = r#"
IFS= read -r line
echo '{"ok":{"sampling_rate":22050,"hop_length":256,"win_length":1024,"alphabet":"abcdefghijklmnopqrstuvwxyz .","encoder_max_position_encoding":102,"style_token_len":2}}'
exit 0
"#;

fn synthesizer_on(sidecar: &Sidecar) -> Synthesizer {
    let model = sidecar.model().unwrap();
    let mut vocoders: HashMap<String, Box<dyn Vocoder>> = HashMap::new();
    vocoders.insert("hifigan".to_string(), Box::new(sidecar.vocoder("hifigan")));
    let mut speakers = BTreeMap::new();
    speakers.insert(
        "anu".to_string(),
        Speaker {
            speaker_id: 0,
            vocoder: "hifigan".to_string(),
        },
    );
    let config = SynthesizerConfig::default().with_max_input_length(100);
    Synthesizer::new(Box::new(model), vocoders, speakers, Frontend::Plain, config).unwrap()
}

#[tokio::test]
async fn crashed_sidecar_leaves_deliveries_for_other_workers() {
    let mut script = tempfile::NamedTempFile::new().unwrap();
    script.write_all(SHORT_LIVED_SIDECAR.as_bytes()).unwrap();
    script.flush().unwrap();
    let mut cmd = Command::new("sh");
    cmd.arg(script.path());
    let sidecar = Sidecar::from_command(cmd).unwrap();

    let synthesizer = synthesizer_on(&sidecar);
    assert!(!synthesizer.needs_calibration());
    let dispatcher = Dispatcher::new(synthesizer);
    let responder = RecordingResponder::default();

    for tag in 1..=3 {
        let err = dispatcher
            .dispatch(message(tag, br#"{"text":"Tere.","speaker":"anu","speed":1.0}"#), &responder)
            .await
            .unwrap_err();
        assert!(err.is_fatal(), "{err}");
    }

    assert_eq!(
        responder.events(),
        vec![Event::Requeued(1), Event::Requeued(2), Event::Requeued(3)]
    );
}
