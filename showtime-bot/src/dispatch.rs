//! Per-identity FIFO dispatch.
//!
//! Messages from one identity are handled strictly in arrival order, one at
//! a time; different identities proceed concurrently. Each active identity
//! gets a lane (a bounded queue drained by its own task) that retires after
//! sitting idle. A full lane drops new messages instead of stalling every
//! other identity behind it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::message::InboundMessage;

/// Something that handles one inbound message to completion.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: InboundMessage);
}

struct Lane {
    tx: mpsc::Sender<InboundMessage>,
    task: AbortHandle,
}

type LaneMap = Arc<Mutex<HashMap<String, Lane>>>;

#[derive(Clone)]
pub struct IdentityLanes {
    lanes: LaneMap,
    handler: Arc<dyn MessageHandler>,
    idle: Duration,
    depth: usize,
}

impl IdentityLanes {
    pub fn new(handler: Arc<dyn MessageHandler>, idle: Duration, depth: usize) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            handler,
            idle,
            depth: depth.max(1),
        }
    }

    /// Queue a message on its identity's lane, opening the lane if needed.
    ///
    /// Returns `false` when the lane is full and the message was dropped.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        let mut lanes = lock(&self.lanes);

        let message = match lanes.get(&message.identity) {
            Some(lane) => match lane.tx.try_send(message) {
                Ok(()) => return true,
                Err(TrySendError::Full(message)) => {
                    warn!(
                        identity = %message.identity,
                        depth = self.depth,
                        "Dispatch lane full, dropping message"
                    );
                    return false;
                }
                // Lane task died; replace it below
                Err(TrySendError::Closed(message)) => message,
            },
            None => message,
        };

        let identity = message.identity.clone();
        let (tx, rx) = mpsc::channel(self.depth);
        // Fresh channel with room for at least one
        let _ = tx.try_send(message);

        let task = tokio::spawn(run_lane(
            identity.clone(),
            rx,
            Arc::clone(&self.handler),
            Arc::clone(&self.lanes),
            self.idle,
        ))
        .abort_handle();
        lanes.insert(identity.clone(), Lane { tx, task });
        debug!(identity = %identity, "Opened dispatch lane");
        true
    }

    /// Drain `inbound` until it closes.
    pub fn spawn(self, mut inbound: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                self.dispatch(message);
            }
            info!("Inbound channel closed, dispatcher stopped");
        })
    }

    pub fn active_lanes(&self) -> usize {
        lock(&self.lanes).len()
    }

    /// Abort every lane task, dropping whatever is still queued.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Lane> = lock(&self.lanes).drain().map(|(_, lane)| lane).collect();
        for lane in &drained {
            lane.task.abort();
        }
        debug!(lanes = drained.len(), "Dispatch lanes stopped");
        drained.len()
    }
}

async fn run_lane(
    identity: String,
    mut rx: mpsc::Receiver<InboundMessage>,
    handler: Arc<dyn MessageHandler>,
    lanes: LaneMap,
    idle: Duration,
) {
    loop {
        let message = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(_) => {
                // Retire under the map lock so no dispatch slips in between
                let mut map = lock(&lanes);
                match rx.try_recv() {
                    Ok(message) => {
                        drop(map);
                        message
                    }
                    Err(_) => {
                        map.remove(&identity);
                        debug!(identity = %identity, "Retired idle dispatch lane");
                        break;
                    }
                }
            }
        };
        handler.handle(message).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
