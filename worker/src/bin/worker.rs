use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tts_worker::config::load_env_file;
use tts_worker::{Consumer, MqConfig, Sidecar, SidecarOptions, Topology};
use tts_worker_core::{read_model_config, Synthesizer, SynthesizerConfig, Vocoder};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

/// Text-to-speech worker: serves synthesis requests from RabbitMQ
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model configuration file
    #[arg(long, default_value = "config/config.yaml")]
    model_config: PathBuf,

    /// Model entry to serve from the configuration file
    #[arg(long)]
    model_name: String,

    /// Maximum characters per inference call; 0 calibrates against the model
    #[arg(long, default_value_t = 0)]
    max_input_length: usize,

    /// Capacity below which overlong segments are rejected instead of retried
    #[arg(long, default_value_t = 10)]
    min_capacity: usize,

    /// Executable hosting the inference model
    #[arg(long, default_value = "tts-inference")]
    inference_command: String,

    /// Environment file with MQ_* settings
    #[arg(long, default_value = "config/.env")]
    env_file: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let env_loaded = load_env_file(&args.env_file);
    init_tracing(&args.log_level, args.log_format);
    info!(env_file = %args.env_file.display(), loaded = env_loaded, "Starting TTS worker");

    let model_config = read_model_config(&args.model_config, &args.model_name)
        .with_context(|| format!("failed to load model '{}'", args.model_name))?;

    let sidecar = Sidecar::spawn(&SidecarOptions::new(&args.inference_command, &model_config))
        .context("failed to start inference sidecar")?;
    let model = sidecar.model().context("inference sidecar did not describe the model")?;

    let mut vocoders: HashMap<String, Box<dyn Vocoder>> = HashMap::new();
    for name in model_config.vocoders.keys() {
        vocoders.insert(name.clone(), Box::new(sidecar.vocoder(name.clone())));
    }

    let synth_config = SynthesizerConfig::default()
        .with_max_input_length(args.max_input_length)
        .with_min_capacity(args.min_capacity);
    let mut synthesizer = Synthesizer::new(
        Box::new(model),
        vocoders,
        model_config.speakers.clone(),
        model_config.frontend,
        synth_config,
    )?;
    if model_config.frontend.uses_converter() {
        synthesizer = synthesizer.with_converter(Box::new(sidecar.converter()));
    }

    if synthesizer.needs_calibration() {
        synthesizer = tokio::task::spawn_blocking(move || -> anyhow::Result<Synthesizer> {
            synthesizer.calibrate()?;
            Ok(synthesizer)
        })
        .await
        .context("calibration task failed")??;
    }
    info!(capacity = synthesizer.capacity_limit(), "Max input length set");

    let mq_config = MqConfig::from_env();
    let topology = Topology::derive(
        &mq_config.exchange,
        &model_config.model_name,
        &synthesizer.speaker_names(),
    );
    info!(
        queue = %topology.queue_name,
        routing_keys = ?topology.routing_keys,
        "Derived broker topology"
    );

    let mut consumer = Consumer::new(mq_config, topology, synthesizer);
    consumer.run().await?;
    Ok(())
}
