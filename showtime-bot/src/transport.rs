//! Messaging transport traits.
//!
//! A [`Transport`] opens sessions on the external messaging network. Each
//! session reports its lifecycle and inbound messages through the
//! [`EventSink`] it was given; the sink is stamped with the connection's
//! generation so events from a replaced session are discarded.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::BotResult;
use crate::message::InboundMessage;

/// Events a live session reports.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The network wants the device paired; `code` is the scannable artifact
    Pairing { code: String },
    /// Startup progress, informational only
    Loading { percent: u8, message: String },
    Authenticated,
    AuthFailure { reason: String },
    /// Handshake complete, messages can flow
    Ready,
    Disconnected { reason: String },
    Message(InboundMessage),
}

/// Event tagged with the connection generation that produced it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Where a session delivers its events.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<Envelope>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<Envelope>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns false once the lifecycle manager is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Envelope {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// A live session on the messaging network.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Send a text reply to `identity`.
    async fn reply(&self, identity: &str, text: &str) -> BotResult<()>;

    /// Cheap liveness check.
    async fn probe(&self) -> BotResult<()>;

    /// Release the session's resources.
    async fn close(&self) -> BotResult<()>;
}

/// Factory for sessions on the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a new session. Returns once the session is started; lifecycle
    /// events (pairing, authenticated, ready, ...) follow on `events`.
    async fn connect(&self, events: EventSink) -> BotResult<Arc<dyn TransportSession>>;
}
