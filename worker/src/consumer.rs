//! Broker consumer: connection lifecycle, topology declaration and the consume loop.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::signal;
use tracing::{error, info, warn};
use tts_worker_core::RequestHandler;

use crate::config::MqConfig;
use crate::dispatch::{Dispatcher, InboundMessage, LapinResponder};
use crate::error::{Result, WorkerError};
use crate::topology::Topology;

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Bound,
    Consuming,
    Stopped,
}

impl ConsumerState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: ConsumerState) -> bool {
        use ConsumerState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Bound)
                | (Bound, Consuming)
                | (Connecting | Bound | Consuming, Disconnected)
                | (_, Stopped)
        ) && self != Stopped
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Bound => "bound",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How a consuming session ended.
enum SessionEnd {
    Interrupted,
    Failed(String),
    /// The handler can no longer serve; reconnecting would not help
    Fatal(WorkerError),
}

/// Open connection with the worker's queue declared and bound.
struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    async fn close(self, reason: &str) {
        if let Err(e) = self.channel.close(200, reason).await {
            warn!(target: "consumer", error = %e, "Failed to close channel");
        }
        if let Err(e) = self.connection.close(200, reason).await {
            warn!(target: "consumer", error = %e, "Failed to close connection");
        }
    }
}

pub struct Consumer<H> {
    config: MqConfig,
    topology: Topology,
    dispatcher: Dispatcher<H>,
    state: ConsumerState,
    reconnect_delay: Duration,
}

impl<H: RequestHandler + 'static> Consumer<H> {
    pub fn new(config: MqConfig, topology: Topology, handler: H) -> Self {
        Self {
            config,
            topology,
            dispatcher: Dispatcher::new(handler),
            state: ConsumerState::Disconnected,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn set_state(&mut self, next: ConsumerState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(target: "consumer", from = %self.state, to = %next, "Unexpected state transition");
        }
        info!(target: "consumer", from = %self.state, to = %next, "Consumer state changed");
        self.state = next;
    }

    fn uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.authority.host = self.config.host.clone();
        uri.authority.port = self.config.port;
        uri.authority.userinfo.username = self.config.username.clone();
        uri.authority.userinfo.password = self.config.password.clone();
        uri.query.heartbeat = Some(self.config.heartbeat);
        uri
    }

    /// Connect and (re)declare the exchange and queue, binding every routing key.
    async fn open(&self) -> Result<Session> {
        info!(
            target: "consumer",
            host = %self.config.host,
            port = self.config.port,
            "Connecting to RabbitMQ server"
        );
        let properties = ConnectionProperties::default()
            .with_connection_name(self.config.connection_name.clone().into());
        let connection = Connection::connect_uri(self.uri(), properties).await?;
        let channel = connection.create_channel().await?;

        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-expires".into(),
            AMQPValue::LongInt(i32::try_from(self.config.x_expires).unwrap_or(i32::MAX)),
        );
        channel
            .queue_declare(
                &self.topology.queue_name,
                QueueDeclareOptions::default(),
                queue_args,
            )
            .await?;

        channel
            .exchange_declare(
                &self.topology.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        for routing_key in &self.topology.routing_keys {
            channel
                .queue_bind(
                    &self.topology.queue_name,
                    &self.topology.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(Session {
            connection,
            channel,
        })
    }

    /// Limit to one unacknowledged delivery and register the consumer.
    async fn start_consuming(&self, session: &Session) -> Result<lapin::Consumer> {
        session
            .channel
            .basic_qos(1, BasicQosOptions::default())
            .await?;

        let mut consume_args = FieldTable::default();
        consume_args.insert("x-priority".into(), AMQPValue::LongInt(self.config.x_priority));
        let consumer = session
            .channel
            .basic_consume(
                &self.topology.queue_name,
                "",
                BasicConsumeOptions::default(),
                consume_args,
            )
            .await?;
        Ok(consumer)
    }

    /// Deliver messages one by one until the stream ends or the broker fails.
    async fn consume(&self, channel: &Channel, consumer: &mut lapin::Consumer) -> Result<()> {
        let responder = LapinResponder::new(channel.clone());
        while let Some(delivery) = consumer.next().await {
            let message = InboundMessage::from(delivery?);
            self.dispatcher.dispatch(message, &responder).await?;
        }
        Ok(())
    }

    /// Run until interrupted, reconnecting after every connection-level failure. Returns the
    /// error when the handler can no longer serve, leaving pending deliveries to other workers.
    pub async fn run(&mut self) -> Result<()> {
        let shutdown = signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            self.set_state(ConsumerState::Connecting);
            let opened = tokio::select! {
                opened = self.open() => Some(opened),
                _ = &mut shutdown => None,
            };

            let failure = match opened {
                None => {
                    self.stop();
                    return Ok(());
                }
                Some(Err(e)) => e.to_string(),
                Some(Ok(session)) => {
                    self.set_state(ConsumerState::Bound);
                    match self.serve(&session, &mut shutdown).await {
                        SessionEnd::Interrupted => {
                            session.close("Interrupted by user").await;
                            self.stop();
                            return Ok(());
                        }
                        SessionEnd::Failed(reason) => {
                            session.close("Reconnecting").await;
                            reason
                        }
                        SessionEnd::Fatal(e) => {
                            error!(target: "consumer", error = %e, "Stopping consumer");
                            session.close("Inference backend unavailable").await;
                            self.set_state(ConsumerState::Stopped);
                            return Err(e);
                        }
                    }
                }
            };

            error!(target: "consumer", error = %failure, "Broker connection lost");
            self.set_state(ConsumerState::Disconnected);
            info!(
                target: "consumer",
                delay_s = self.reconnect_delay.as_secs(),
                "Trying to reconnect"
            );
            let interrupted = tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => false,
                _ = &mut shutdown => true,
            };
            if interrupted {
                self.stop();
                return Ok(());
            }
        }
    }

    /// Start consuming on an open session and serve deliveries until it ends.
    async fn serve<F>(&mut self, session: &Session, shutdown: &mut Pin<&mut F>) -> SessionEnd
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let started = tokio::select! {
            started = self.start_consuming(session) => Some(started),
            _ = shutdown.as_mut() => None,
        };
        let mut consumer = match started {
            None => return SessionEnd::Interrupted,
            Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
            Some(Ok(consumer)) => consumer,
        };

        self.set_state(ConsumerState::Consuming);
        info!(
            target: "consumer",
            queue = %self.topology.queue_name,
            routing_keys = ?self.topology.routing_keys,
            "Ready to process requests"
        );

        let outcome = tokio::select! {
            outcome = self.consume(&session.channel, &mut consumer) => Some(outcome),
            _ = shutdown.as_mut() => None,
        };
        match outcome {
            None => SessionEnd::Interrupted,
            Some(Ok(())) => SessionEnd::Failed("delivery stream ended".to_string()),
            Some(Err(e)) if e.is_fatal() => SessionEnd::Fatal(e),
            Some(Err(e)) => SessionEnd::Failed(e.to_string()),
        }
    }

    fn stop(&mut self) {
        self.set_state(ConsumerState::Stopped);
        info!(target: "consumer", "Interrupted by user. Exiting...");
    }
}
