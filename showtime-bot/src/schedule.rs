//! One-shot refresh jobs on tokio timers.
//!
//! A job names a point in time and what to refresh (the listings, or one
//! title's details). Adding a job whose time already passed runs it right
//! away; adding a job under an existing ID replaces the pending one. Every
//! run is reported as `Running` followed by `Succeeded` or `Failed`, both to
//! the log and to [`RefreshScheduler::subscribe`] receivers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use showtime_common::ScheduledJobConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::{BotError, BotResult};

/// What a job refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshTarget {
    Listings,
    Details { title: String },
}

/// A scheduled refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshJob {
    pub id: String,
    pub run_at: DateTime<Utc>,
    pub target: RefreshTarget,
}

impl RefreshJob {
    pub fn new(id: impl Into<String>, run_at: DateTime<Utc>, target: RefreshTarget) -> Self {
        Self {
            id: id.into(),
            run_at,
            target,
        }
    }

    pub fn from_config(config: &ScheduledJobConfig) -> BotResult<Self> {
        let run_at = DateTime::parse_from_rfc3339(&config.run_at)
            .map_err(|e| {
                BotError::Config(format!("job {}: bad run_at {:?}: {e}", config.id, config.run_at))
            })?
            .with_timezone(&Utc);
        let target = match &config.title {
            Some(title) => RefreshTarget::Details {
                title: title.clone(),
            },
            None => RefreshTarget::Listings,
        };
        Ok(Self::new(config.id.clone(), run_at, target))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub target: RefreshTarget,
    pub run_at: DateTime<Utc>,
    pub state: JobState,
    pub last_run: Option<DateTime<Utc>>,
    /// Summary on success, error text on failure
    pub last_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    Running,
    Succeeded { output: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub id: String,
    pub kind: JobEventKind,
    pub at: DateTime<Utc>,
}

/// Performs the refresh a job asks for.
#[async_trait]
pub trait RefreshAction: Send + Sync + 'static {
    /// Refresh `target`, returning a short summary of what was loaded.
    async fn refresh(&self, target: &RefreshTarget) -> BotResult<String>;
}

struct JobEntry {
    job: RefreshJob,
    state: JobState,
    last_run: Option<DateTime<Utc>>,
    last_output: Option<String>,
    /// Distinguishes this registration from a replaced one with the same ID
    seq: u64,
    task: Option<AbortHandle>,
}

impl JobEntry {
    fn info(&self) -> JobInfo {
        JobInfo {
            id: self.job.id.clone(),
            target: self.job.target.clone(),
            run_at: self.job.run_at,
            state: self.state,
            last_run: self.last_run,
            last_output: self.last_output.clone(),
        }
    }
}

struct Inner {
    jobs: Mutex<HashMap<String, JobEntry>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<JobEvent>,
    action: Arc<dyn RefreshAction>,
}

impl Inner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, id: &str, kind: JobEventKind) {
        // No receivers is fine
        let _ = self.events.send(JobEvent {
            id: id.to_string(),
            kind,
            at: Utc::now(),
        });
    }
}

/// Keeps one timer per job ID.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

impl RefreshScheduler {
    pub fn new(action: Arc<dyn RefreshAction>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                events,
                action,
            }),
        }
    }

    /// Schedule `job`, replacing any pending job with the same ID.
    pub fn add(&self, job: RefreshJob) -> JobInfo {
        let delay = (job.run_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = job.id.clone();

        let mut jobs = self.inner.jobs();
        if let Some(previous) = jobs.remove(&id) {
            if let Some(task) = previous.task {
                task.abort();
            }
            debug!(job_id = %id, "Replaced scheduled job");
        }

        if delay.is_zero() {
            info!(job_id = %id, refresh = ?job.target, "Job already due, running now");
        } else {
            info!(
                job_id = %id,
                refresh = ?job.target,
                run_at = %job.run_at.to_rfc3339(),
                "Scheduled refresh job"
            );
        }

        let task = tokio::spawn(run_job(Arc::clone(&self.inner), id.clone(), seq, delay));
        let entry = JobEntry {
            job,
            state: JobState::Scheduled,
            last_run: None,
            last_output: None,
            seq,
            task: Some(task.abort_handle()),
        };
        let info = entry.info();
        jobs.insert(id, entry);
        info
    }

    /// Cancel a job. Returns whether it existed.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.inner.jobs().remove(id) else {
            return false;
        };
        if let Some(task) = entry.task {
            task.abort();
        }
        info!(job_id = %id, "Cancelled refresh job");
        true
    }

    pub fn status(&self, id: &str) -> Option<JobInfo> {
        self.inner.jobs().get(id).map(JobEntry::info)
    }

    /// Every known job, soonest first.
    pub fn list(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.inner.jobs().values().map(JobEntry::info).collect();
        jobs.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Cancel every job, pending or running.
    pub fn clear(&self) -> usize {
        let drained: Vec<JobEntry> = self.inner.jobs().drain().map(|(_, entry)| entry).collect();
        for task in drained.iter().filter_map(|entry| entry.task.as_ref()) {
            task.abort();
        }
        info!(jobs = drained.len(), "Cleared refresh jobs");
        drained.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }
}

async fn run_job(inner: Arc<Inner>, id: String, seq: u64, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let target = {
        let mut jobs = inner.jobs();
        let Some(entry) = jobs.get_mut(&id).filter(|entry| entry.seq == seq) else {
            return;
        };
        entry.state = JobState::Running;
        entry.last_run = Some(Utc::now());
        entry.job.target.clone()
    };
    inner.emit(&id, JobEventKind::Running);
    debug!(job_id = %id, refresh = ?target, "Running refresh job");

    let result = inner.action.refresh(&target).await;

    if let Some(entry) = inner.jobs().get_mut(&id).filter(|entry| entry.seq == seq) {
        entry.task = None;
        match &result {
            Ok(output) => {
                entry.state = JobState::Succeeded;
                entry.last_output = Some(output.clone());
            }
            Err(e) => {
                entry.state = JobState::Failed;
                entry.last_output = Some(e.to_string());
            }
        }
    }

    match result {
        Ok(output) => {
            info!(job_id = %id, output = %output, "Refresh job finished");
            inner.emit(&id, JobEventKind::Succeeded { output });
        }
        Err(e) => {
            warn!(job_id = %id, error = %e, "Refresh job failed");
            inner.emit(
                &id,
                JobEventKind::Failed {
                    error: e.to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct Recorder {
        calls: AtomicUsize,
        failing: bool,
        latency: Duration,
        targets: Mutex<Vec<RefreshTarget>>,
    }

    #[async_trait]
    impl RefreshAction for Recorder {
        async fn refresh(&self, target: &RefreshTarget) -> BotResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(target.clone());
            sleep(self.latency).await;
            if self.failing {
                Err(BotError::Upstream("HTTP 503".into()))
            } else {
                Ok("12 listings".into())
            }
        }
    }

    fn recorder(failing: bool, latency: Duration) -> Arc<Recorder> {
        Arc::new(Recorder {
            calls: AtomicUsize::new(0),
            failing,
            latency,
            targets: Mutex::new(Vec::new()),
        })
    }

    fn in_secs(secs: i64) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::seconds(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_at_its_time() {
        let action = recorder(false, Duration::ZERO);
        let scheduler = RefreshScheduler::new(action.clone());

        let info = scheduler.add(RefreshJob::new("morning", in_secs(60), RefreshTarget::Listings));
        assert_eq!(info.state, JobState::Scheduled);

        sleep(Duration::from_secs(59)).await;
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.status("morning").unwrap().state, JobState::Scheduled);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
        let status = scheduler.status("morning").unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.last_output.as_deref(), Some("12 listings"));
        assert!(status.last_run.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_job_runs_immediately() {
        let action = recorder(false, Duration::ZERO);
        let scheduler = RefreshScheduler::new(action.clone());

        scheduler.add(RefreshJob::new(
            "late",
            in_secs(-3600),
            RefreshTarget::Details {
                title: "Dune".into(),
            },
        ));
        sleep(Duration::from_millis(1)).await;

        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            action.targets.lock().unwrap()[0],
            RefreshTarget::Details {
                title: "Dune".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_id_replaces_pending_timer() {
        let action = recorder(false, Duration::ZERO);
        let scheduler = RefreshScheduler::new(action.clone());

        scheduler.add(RefreshJob::new("refresh", in_secs(60), RefreshTarget::Listings));
        scheduler.add(RefreshJob::new("refresh", in_secs(120), RefreshTarget::Listings));
        assert_eq!(scheduler.list().len(), 1);

        sleep(Duration::from_secs(90)).await;
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(40)).await;
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_job() {
        let action = recorder(false, Duration::ZERO);
        let scheduler = RefreshScheduler::new(action.clone());

        scheduler.add(RefreshJob::new("refresh", in_secs(60), RefreshTarget::Listings));
        assert!(scheduler.cancel("refresh"));
        assert!(!scheduler.cancel("refresh"));
        assert!(scheduler.status("refresh").is_none());

        sleep(Duration::from_secs(120)).await;
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_shows_running_job() {
        let action = recorder(false, Duration::from_secs(10));
        let scheduler = RefreshScheduler::new(action.clone());

        scheduler.add(RefreshJob::new("slow", in_secs(-1), RefreshTarget::Listings));
        sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.status("slow").unwrap().state, JobState::Running);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(scheduler.status("slow").unwrap().state, JobState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported() {
        let action = recorder(true, Duration::ZERO);
        let scheduler = RefreshScheduler::new(action);
        let mut events = scheduler.subscribe();

        scheduler.add(RefreshJob::new("broken", in_secs(-1), RefreshTarget::Listings));

        let first = events.recv().await.unwrap();
        assert_eq!(first.id, "broken");
        assert_eq!(first.kind, JobEventKind::Running);
        let second = events.recv().await.unwrap();
        assert_eq!(
            second.kind,
            JobEventKind::Failed {
                error: "Upstream error: HTTP 503".into()
            }
        );

        let status = scheduler.status("broken").unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.last_output.as_deref(), Some("Upstream error: HTTP 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_everything() {
        let action = recorder(false, Duration::ZERO);
        let scheduler = RefreshScheduler::new(action.clone());

        scheduler.add(RefreshJob::new("b", in_secs(120), RefreshTarget::Listings));
        scheduler.add(RefreshJob::new("a", in_secs(60), RefreshTarget::Listings));
        let ids: Vec<String> = scheduler.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(scheduler.clear(), 2);
        assert!(scheduler.list().is_empty());

        sleep(Duration::from_secs(300)).await;
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_job_from_config() {
        let job = RefreshJob::from_config(&ScheduledJobConfig {
            id: "dune".into(),
            run_at: "2026-03-10T09:00:00-03:00".into(),
            title: Some("Dune".into()),
        })
        .unwrap();
        assert_eq!(job.run_at.to_rfc3339(), "2026-03-10T12:00:00+00:00");
        assert_eq!(
            job.target,
            RefreshTarget::Details {
                title: "Dune".into()
            }
        );

        let err = RefreshJob::from_config(&ScheduledJobConfig {
            id: "bad".into(),
            run_at: "tomorrow".into(),
            title: None,
        })
        .unwrap_err();
        assert!(matches!(err, BotError::Config(_)));
    }
}
