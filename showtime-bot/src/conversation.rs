//! Per-identity conversation memory.
//!
//! Each identity keeps its most recent user/assistant pairs plus free-form
//! preferences. Contexts are created lazily, refreshed on every exchange and
//! dropped by the sweeper once idle past the expiry window, so memory follows
//! the number of active identities rather than historical traffic.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::{SharedClock, SystemClock};
use crate::error::BotResult;
use crate::sweeper::Sweepable;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Conversation state for a single identity.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub history: VecDeque<Turn>,
    pub last_activity: Instant,
    pub preferences: HashMap<String, String>,
}

impl ConversationContext {
    fn new(now: Instant) -> Self {
        Self {
            history: VecDeque::new(),
            last_activity: now,
            preferences: HashMap::new(),
        }
    }
}

/// Sharded store of conversation contexts keyed by identity.
pub struct ConversationStore {
    contexts: DashMap<String, ConversationContext>,
    max_pairs: usize,
    idle_expiry: Duration,
    max_identities: usize,
    /// Held while admitting a new identity so the ceiling cannot be overshot
    admit: Mutex<()>,
    clock: SharedClock,
}

impl ConversationStore {
    pub fn new(max_pairs: usize, idle_expiry: Duration, max_identities: usize) -> Self {
        Self::with_clock(max_pairs, idle_expiry, max_identities, Arc::new(SystemClock))
    }

    pub fn with_clock(
        max_pairs: usize,
        idle_expiry: Duration,
        max_identities: usize,
        clock: SharedClock,
    ) -> Self {
        Self {
            contexts: DashMap::new(),
            max_pairs: max_pairs.max(1),
            idle_expiry,
            max_identities: max_identities.max(1),
            admit: Mutex::new(()),
            clock,
        }
    }

    /// Maximum retained history entries per identity (two per pair).
    pub fn max_entries(&self) -> usize {
        self.max_pairs * 2
    }

    /// Snapshot of the identity's context, creating an empty one if absent.
    pub fn get_or_create(&self, identity: &str) -> ConversationContext {
        self.with_context(identity, |ctx| ctx.clone())
    }

    /// Append one exchange and trim to the pair bound.
    pub fn append(&self, identity: &str, user_text: &str, reply_text: &str) {
        let now = self.clock.now();
        let max_entries = self.max_entries();
        self.with_context(identity, |ctx| {
            ctx.history.push_back(Turn::user(user_text));
            ctx.history.push_back(Turn::assistant(reply_text));
            while ctx.history.len() > max_entries {
                ctx.history.pop_front();
            }
            ctx.last_activity = now;
        });
    }

    /// History for an identity, oldest first. Empty when unknown.
    pub fn history(&self, identity: &str) -> Vec<Turn> {
        self.contexts
            .get(identity)
            .map(|ctx| ctx.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_preference(&self, identity: &str, key: impl Into<String>, value: impl Into<String>) {
        let now = self.clock.now();
        let (key, value) = (key.into(), value.into());
        self.with_context(identity, |ctx| {
            ctx.preferences.insert(key, value);
            ctx.last_activity = now;
        });
    }

    pub fn preference(&self, identity: &str, key: &str) -> Option<String> {
        self.contexts
            .get(identity)
            .and_then(|ctx| ctx.preferences.get(key).cloned())
    }

    /// Forget an identity. Returns whether it was tracked.
    pub fn remove(&self, identity: &str) -> bool {
        self.contexts.remove(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drop contexts idle longer than the expiry window.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.contexts.len();
        self.contexts
            .retain(|_, ctx| now.saturating_duration_since(ctx.last_activity) <= self.idle_expiry);
        before.saturating_sub(self.contexts.len())
    }

    /// Run `f` on the identity's context, admitting it first if absent.
    ///
    /// Existing identities never touch the admission lock. New ones are
    /// admitted one at a time: evict to make room, then insert.
    fn with_context<R>(&self, identity: &str, f: impl FnOnce(&mut ConversationContext) -> R) -> R {
        if let Some(mut ctx) = self.contexts.get_mut(identity) {
            return f(&mut *ctx);
        }

        let _admit = self.admit.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have admitted it while we waited
        if let Some(mut ctx) = self.contexts.get_mut(identity) {
            return f(&mut *ctx);
        }

        self.make_room();
        let mut ctx = ConversationContext::new(self.clock.now());
        let out = f(&mut ctx);
        self.contexts.insert(identity.to_string(), ctx);
        out
    }

    /// Evict least recently active identities until a new one fits.
    fn make_room(&self) {
        while self.contexts.len() >= self.max_identities {
            let oldest = self
                .contexts
                .iter()
                .min_by_key(|entry| entry.value().last_activity)
                .map(|entry| entry.key().clone());

            let Some(oldest) = oldest else { break };
            self.contexts.remove(&oldest);
            debug!(identity = %oldest, "Conversation capacity reached, evicted least active");
        }
    }
}

impl Sweepable for ConversationStore {
    fn name(&self) -> &str {
        "conversations"
    }

    fn sweep(&self) -> BotResult<usize> {
        Ok(self.sweep_idle())
    }
}
