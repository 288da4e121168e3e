//! Periodic eviction of expired cache entries and idle conversations.
//!
//! Every registered structure gets its own task ticking on its own period.
//! A sweep only holds the swept structure's lock for the duration of one
//! `retain` pass; failures are logged and the task keeps running.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::BotResult;

/// A structure the sweeper can purge.
pub trait Sweepable: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Remove expired content, returning how many entries were dropped.
    fn sweep(&self) -> BotResult<usize>;
}

struct SweepTarget {
    target: Arc<dyn Sweepable>,
    period: Duration,
}

/// Builder for the sweeper tasks.
#[derive(Default)]
pub struct EvictionSweeper {
    targets: Vec<SweepTarget>,
}

impl EvictionSweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep `target` every `period`.
    pub fn register(mut self, target: Arc<dyn Sweepable>, period: Duration) -> Self {
        self.targets.push(SweepTarget { target, period });
        self
    }

    /// Run one sweep of `target`, logging instead of propagating failures.
    pub fn sweep_once(target: &dyn Sweepable) -> usize {
        match target.sweep() {
            Ok(0) => {
                debug!(target_name = %target.name(), "Sweep found nothing to evict");
                0
            }
            Ok(removed) => {
                info!(target_name = %target.name(), removed, "Sweep evicted expired entries");
                removed
            }
            Err(e) => {
                warn!(target_name = %target.name(), error = %e, "Sweep failed");
                0
            }
        }
    }

    /// Spawn one task per registered target.
    pub fn spawn(self) -> SweeperHandle {
        let tasks = self
            .targets
            .into_iter()
            .map(|SweepTarget { target, period }| {
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // First tick completes immediately
                    interval.tick().await;

                    loop {
                        interval.tick().await;
                        Self::sweep_once(target.as_ref());
                    }
                })
            })
            .collect();

        SweeperHandle { tasks }
    }
}

/// Running sweeper tasks.
pub struct SweeperHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every sweeper task.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        debug!(tasks = self.tasks.len(), "Sweeper stopped");
    }
}
