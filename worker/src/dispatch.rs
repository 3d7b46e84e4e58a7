use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions};
use lapin::{BasicProperties, Channel};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tts_worker_core::{Request, RequestHandler, Response};

use crate::error::Result;

/// Reply sent when even the error envelope cannot be serialized.
const FALLBACK_REPLY: &[u8] =
    br#"{"status_code":500,"status":"Unknown internal error.","content":null}"#;

/// A delivery reduced to what dispatch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

impl From<lapin::message::Delivery> for InboundMessage {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            reply_to: delivery
                .properties
                .reply_to()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            correlation_id: delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            body: delivery.data,
        }
    }
}

/// Outbound side of the broker: reply publication, acknowledgment and requeueing.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        payload: &[u8],
    ) -> Result<()>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Return an unanswered delivery to the queue for another consumer.
    async fn requeue(&self, delivery_tag: u64) -> Result<()>;
}

/// Responder publishing through the default exchange of an AMQP channel.
pub struct LapinResponder {
    channel: Channel,
}

impl LapinResponder {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Responder for LapinResponder {
    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        payload: &[u8],
    ) -> Result<()> {
        let mut properties =
            BasicProperties::default().with_content_type("application/json".into());
        if let Some(correlation_id) = correlation_id {
            properties = properties.with_correlation_id(correlation_id.into());
        }
        self.channel
            .basic_publish(
                "",
                reply_to,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await?;
        Ok(())
    }
}

/// Runs requests through the handler one at a time and answers every delivery exactly once.
pub struct Dispatcher<H> {
    handler: Arc<Mutex<H>>,
}

impl<H> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H: RequestHandler + 'static> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(Mutex::new(handler)),
        }
    }

    pub fn handler(&self) -> Arc<Mutex<H>> {
        self.handler.clone()
    }

    /// Decode a body and run it through the handler. Every per-request outcome is a reply;
    /// `Err` only when the handler can no longer serve requests.
    pub async fn respond(&self, body: &[u8]) -> Result<Response> {
        let request = match Request::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                warn!(target: "consumer", error = %e, "Rejecting malformed request");
                return Ok(Response::from_error(&e));
            }
        };

        // synthesis blocks for the whole model run
        let mut handler = self.handler.clone().lock_owned().await;
        let outcome = tokio::task::spawn_blocking(move || handler.handle(request)).await;
        match outcome {
            Ok(handled) => handled.map_err(Into::into),
            Err(e) => {
                error!(target: "consumer", error = %e, "Request handler crashed");
                Ok(Response::internal_error())
            }
        }
    }

    /// Handle one delivery: reply first, acknowledge second. A broker error on either step
    /// is returned and the delivery is left for redelivery. A handler that can no longer
    /// serve requeues the delivery unanswered and returns its error.
    pub async fn dispatch<R>(&self, message: InboundMessage, responder: &R) -> Result<()>
    where
        R: Responder + ?Sized,
    {
        let started = Instant::now();
        let correlation_id = message.correlation_id.as_deref().unwrap_or("-");
        info!(
            target: "consumer",
            correlation_id = %correlation_id,
            size = message.body.len(),
            "Received request"
        );

        let response = match self.respond(&message.body).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    target: "consumer",
                    correlation_id = %correlation_id,
                    error = %e,
                    "Handler unavailable; returning request to the queue"
                );
                responder.requeue(message.delivery_tag).await?;
                return Err(e);
            }
        };
        let status_code = response.status_code;
        let payload = match response.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(target: "consumer", error = %e, "Failed to encode response");
                FALLBACK_REPLY.to_vec()
            }
        };

        match message.reply_to.as_deref() {
            Some(reply_to) => {
                responder
                    .publish_reply(reply_to, message.correlation_id.as_deref(), &payload)
                    .await?
            }
            None => warn!(
                target: "consumer",
                correlation_id = %correlation_id,
                "Request has no reply destination; acknowledging without a reply"
            ),
        }
        responder.ack(message.delivery_tag).await?;

        info!(
            target: "consumer",
            correlation_id = %correlation_id,
            status_code,
            duration_s = %format!("{:.3}", started.elapsed().as_secs_f64()),
            size = payload.len(),
            "Request processed"
        );
        Ok(())
    }
}
