// TTS Worker
// AMQP consumer, inference sidecar adapter and process wiring

pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod sidecar;
pub mod topology;

pub use config::MqConfig;
pub use consumer::{Consumer, ConsumerState};
pub use dispatch::{Dispatcher, InboundMessage, LapinResponder, Responder};
pub use error::{Result, WorkerError};
pub use sidecar::{Sidecar, SidecarOptions};
pub use topology::Topology;
