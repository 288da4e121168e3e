//! Terminal transport for local testing.
//!
//! Each stdin line is a direct text message from a single local identity,
//! replies go to stdout. Sessions come up without pairing.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::error::{BotError, BotResult};
use crate::message::InboundMessage;
use crate::transport::{EventSink, Transport, TransportEvent, TransportSession};

/// Identity used for every terminal message.
pub const CLI_IDENTITY: &str = "cli-user";

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Stdin/stdout transport.
pub struct CliTransport {
    source: Mutex<Option<LineSource>>,
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl CliTransport {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(io::stdin()))
    }

    /// Read messages from `reader` instead of stdin.
    pub fn from_reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            source: Mutex::new(Some(Box::new(reader))),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// The reader outlives sessions; lines go to whichever sink is current.
    fn start_reader(&self) {
        let Some(source) = self.source.lock().ok().and_then(|mut s| s.take()) else {
            return;
        };
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            let mut lines = source.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let current = sink.lock().ok().and_then(|s| s.clone());
                match current {
                    Some(sink) => {
                        let message = InboundMessage::text(CLI_IDENTITY, line);
                        if !sink.emit(TransportEvent::Message(message)).await {
                            break;
                        }
                    }
                    None => debug!("No live CLI session, dropping input"),
                }
            }
            info!("CLI input closed");
        });
    }
}

impl Default for CliTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for CliTransport {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn connect(&self, events: EventSink) -> BotResult<Arc<dyn TransportSession>> {
        self.start_reader();
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(events.clone());
        }

        if !events.emit(TransportEvent::Authenticated).await
            || !events.emit(TransportEvent::Ready).await
        {
            return Err(BotError::Connection("session manager gone".into()));
        }

        Ok(Arc::new(CliSession {
            generation: events.generation(),
            sink: Arc::clone(&self.sink),
        }))
    }
}

struct CliSession {
    generation: u64,
    sink: Arc<Mutex<Option<EventSink>>>,
}

#[async_trait]
impl TransportSession for CliSession {
    async fn reply(&self, identity: &str, text: &str) -> BotResult<()> {
        println!("[{identity}] {text}");
        Ok(())
    }

    async fn probe(&self) -> BotResult<()> {
        Ok(())
    }

    async fn close(&self) -> BotResult<()> {
        if let Ok(mut slot) = self.sink.lock() {
            if slot.as_ref().is_some_and(|s| s.generation() == self.generation) {
                *slot = None;
            }
        }
        Ok(())
    }
}
