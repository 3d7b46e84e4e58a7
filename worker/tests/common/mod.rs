// Broker stand-ins shared by the dispatch tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tts_worker::{InboundMessage, Responder, WorkerError};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Published {
        reply_to: String,
        correlation_id: Option<String>,
        payload: Value,
    },
    Acked(u64),
    Requeued(u64),
}

// Responder that records every broker call in order
#[derive(Default, Clone)]
pub struct RecordingResponder {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub fail_publish: bool,
}

impl RecordingResponder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        payload: &[u8],
    ) -> tts_worker::Result<()> {
        if self.fail_publish {
            return Err(WorkerError::Config("channel closed".into()));
        }
        self.events.lock().unwrap().push(Event::Published {
            reply_to: reply_to.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            payload: serde_json::from_slice(payload).unwrap(),
        });
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> tts_worker::Result<()> {
        self.events.lock().unwrap().push(Event::Acked(delivery_tag));
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> tts_worker::Result<()> {
        self.events.lock().unwrap().push(Event::Requeued(delivery_tag));
        Ok(())
    }
}

pub fn message(tag: u64, body: &[u8]) -> InboundMessage {
    InboundMessage {
        delivery_tag: tag,
        reply_to: Some("amq.gen-reply".to_string()),
        correlation_id: Some(format!("corr-{tag}")),
        body: body.to_vec(),
    }
}
