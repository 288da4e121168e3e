//! Shared mocks for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use showtime_bot::{
    BotError, BotResult, CatalogSource, EventSink, GenerationRequest, SessionHandle, SessionState,
    Showtime, TextGenerator, Transport, TransportEvent, TransportSession,
};
use showtime_common::Config;

// ============================================================================
// Transport
// ============================================================================

/// What a mock connect does.
pub enum ConnectPlan {
    /// Restored credentials: authenticated, then ready
    Ready,
    /// Ask for pairing and wait
    Pairing(String),
    Fail(BotError),
}

pub struct MockSession {
    pub replies: Mutex<Vec<(String, String)>>,
    pub healthy: AtomicBool,
    pub closed: AtomicBool,
}

impl MockSession {
    fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn reply(&self, identity: &str, text: &str) -> BotResult<()> {
        self.replies
            .lock()
            .unwrap()
            .push((identity.to_string(), text.to_string()));
        Ok(())
    }

    async fn probe(&self) -> BotResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BotError::Connection("browser gone".into()))
        }
    }

    async fn close(&self) -> BotResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport following a script of connect outcomes; `Ready` once the
/// script runs out.
pub struct MockTransport {
    plans: Mutex<VecDeque<ConnectPlan>>,
    connects: Mutex<Vec<Instant>>,
    sinks: Mutex<Vec<EventSink>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_plans(Vec::new())
    }

    pub fn with_plans(plans: Vec<ConnectPlan>) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
            connects: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    /// Emit on the most recent connection.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sink = self.sinks.lock().unwrap().last().cloned();
        match sink {
            Some(sink) => sink.emit(event).await,
            None => false,
        }
    }

    /// Emit on the connection made by connect call `index`.
    pub async fn emit_on(&self, index: usize, event: TransportEvent) -> bool {
        let sink = self.sinks.lock().unwrap().get(index).cloned();
        match sink {
            Some(sink) => sink.emit(event).await,
            None => false,
        }
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn last_session(&self) -> Arc<MockSession> {
        self.sessions.lock().unwrap().last().cloned().unwrap()
    }

    /// Every reply sent on any session, in order.
    pub fn all_replies(&self) -> Vec<(String, String)> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .flat_map(|s| s.replies())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, events: EventSink) -> BotResult<Arc<dyn TransportSession>> {
        self.connects.lock().unwrap().push(Instant::now());
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectPlan::Ready);

        let session = Arc::new(MockSession::new());
        match plan {
            ConnectPlan::Fail(e) => return Err(e),
            ConnectPlan::Ready => {
                events.emit(TransportEvent::Authenticated).await;
                events.emit(TransportEvent::Ready).await;
            }
            ConnectPlan::Pairing(code) => {
                events.emit(TransportEvent::Pairing { code }).await;
            }
        }

        self.sinks.lock().unwrap().push(events);
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

// ============================================================================
// Upstreams
// ============================================================================

pub struct MockCatalog {
    pub calls: AtomicU32,
    pub failing: AtomicBool,
    pub rows: Mutex<Vec<Showtime>>,
    pub latency: Duration,
}

impl MockCatalog {
    pub fn new(rows: Vec<Showtime>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            rows: Mutex::new(rows),
            latency: Duration::from_millis(20),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogSource for MockCatalog {
    fn name(&self) -> &str {
        "mock-catalog"
    }

    async fn list(&self) -> BotResult<Vec<Showtime>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.failing.load(Ordering::SeqCst) {
            Err(BotError::Upstream("HTTP 503: maintenance".into()))
        } else {
            Ok(self.rows.lock().unwrap().clone())
        }
    }
}

/// Replies `re: <text> (<n> turns)`; texts containing "slow" take 500 ms.
pub struct EchoGenerator {
    pub calls: AtomicU32,
    pub failing: AtomicBool,
    pub prompts: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &GenerationRequest) -> BotResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.system.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(BotError::RateLimited("HTTP 429: quota".into()));
        }
        let latency = if request.user_text.contains("slow") { 500 } else { 10 };
        tokio::time::sleep(Duration::from_millis(latency)).await;
        Ok(format!(
            "re: {} ({} turns)",
            request.user_text,
            request.history.len()
        ))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// A showtime `hours` from now, venue-local at UTC-3.
pub fn showtime(title: &str, hours: i64) -> Showtime {
    let local = Utc::now().naive_utc() - chrono::Duration::hours(3) + chrono::Duration::hours(hours);
    Showtime {
        title: title.into(),
        venue: "Cine Centro".into(),
        room: Some("Sala 1".into()),
        starts_at: local,
        price: Some(5000.0),
        duration_minutes: Some(120),
        enabled: true,
    }
}

/// Config with short retry delays and the default session timings.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 1_000;
    config.retry.call_timeout_secs = 5;
    config.catalog.utc_offset_hours = -3;
    config.session.max_reconnect_attempts = 3;
    config.session.reconnect_interval_secs = 10;
    config.session.reconnect_cooldown_secs = 600;
    config.session.probe_interval_secs = 300;
    config.session.probe_timeout_secs = 15;
    config
}

pub async fn wait_for(handle: &SessionHandle, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(24 * 3600), handle.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
}

/// Poll until `n` replies have been sent over the transport.
pub async fn wait_for_replies(transport: &MockTransport, n: usize) -> Vec<(String, String)> {
    for _ in 0..1000 {
        let replies = transport.all_replies();
        if replies.len() >= n {
            return replies;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} replies, got {:?}", transport.all_replies());
}
