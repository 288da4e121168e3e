//! Status fan-out to observers.
//!
//! New subscribers get the current status (and pairing code, if any) up
//! front, then every later update.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;
use tokio::sync::broadcast;

use super::SessionState;

/// One status notification.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub state: SessionState,
    pub message: String,
    /// Set while awaiting pairing
    pub pairing_code: Option<String>,
    /// Startup progress, set on loading updates only
    pub progress: Option<u8>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(state: SessionState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            pairing_code: None,
            progress: None,
            at: Utc::now(),
        }
    }

    pub fn with_pairing_code(mut self, code: Option<String>) -> Self {
        self.pairing_code = code;
        self
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress = Some(percent);
        self
    }
}

pub struct StatusHub {
    tx: broadcast::Sender<StatusUpdate>,
    current: RwLock<StatusUpdate>,
}

impl StatusHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            current: RwLock::new(StatusUpdate::new(SessionState::Disconnected, "Not started")),
        }
    }

    /// Publish a state update; it becomes the replay for new subscribers.
    pub fn publish(&self, update: StatusUpdate) {
        if let Ok(mut current) = self.current.write() {
            *current = update.clone();
        }
        // No receivers is fine
        let _ = self.tx.send(update);
    }

    /// Publish a transient update (loading progress) without replacing the replay.
    pub fn notify(&self, update: StatusUpdate) {
        let _ = self.tx.send(update);
    }

    pub fn current(&self) -> Option<StatusUpdate> {
        self.current.read().ok().map(|c| c.clone())
    }

    /// Current status plus a receiver for everything after it.
    pub fn subscribe(&self) -> (Option<StatusUpdate>, broadcast::Receiver<StatusUpdate>) {
        let rx = self.tx.subscribe();
        (self.current(), rx)
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new(64)
    }
}
