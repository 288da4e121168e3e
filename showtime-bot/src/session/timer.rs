//! Single-slot scheduler for the lifecycle manager's deferred work.
//!
//! At most one task is pending at a time: a reconnect and a cool-down reset
//! never overlap, and scheduling a new task replaces the old one.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTask {
    Reconnect,
    CooldownReset,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    pending: Option<(Instant, ScheduledTask)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` after `delay`, replacing whatever was pending.
    pub fn schedule(&mut self, task: ScheduledTask, delay: Duration) {
        self.pending = Some((Instant::now() + delay, task));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(at, _)| at)
    }

    pub fn pending(&self) -> Option<ScheduledTask> {
        self.pending.map(|(_, task)| task)
    }

    /// Take the pending task if its deadline has passed.
    pub fn take_due(&mut self) -> Option<ScheduledTask> {
        match self.pending {
            Some((at, task)) if at <= Instant::now() => {
                self.pending = None;
                Some(task)
            }
            _ => None,
        }
    }
}
