//! Session lifecycle manager.
//!
//! A single task owns the session state. Commands from [`SessionHandle`]s,
//! transport events, the health probe tick and the scheduled reconnect or
//! cool-down all funnel through one `select!` loop, so transitions never
//! interleave.

use showtime_common::SessionConfig;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::status::{StatusHub, StatusUpdate};
use super::timer::{ScheduledTask, Scheduler};
use super::{FailureCause, SessionState, Trigger};
use crate::error::{BotError, BotResult};
use crate::message::InboundMessage;
use crate::transport::{Envelope, EventSink, Transport, TransportEvent, TransportSession};

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 16;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Initialize,
    Restart,
    Shutdown,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub reconnect_attempts: u32,
    pub failure: Option<FailureCause>,
    pub pairing_code: Option<String>,
}

struct Shared {
    snapshot: watch::Sender<SessionSnapshot>,
    current: RwLock<Option<Arc<dyn TransportSession>>>,
    status: StatusHub,
}

/// Cloneable handle to a running [`SessionLifecycleManager`].
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Watch every snapshot change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// The live session, only while `Ready`.
    pub fn current_session(&self) -> Option<Arc<dyn TransportSession>> {
        self.shared.current.read().ok().and_then(|c| c.clone())
    }

    /// Current status plus all later updates.
    pub fn subscribe(&self) -> (Option<StatusUpdate>, broadcast::Receiver<StatusUpdate>) {
        self.shared.status.subscribe()
    }

    pub async fn initialize(&self) -> BotResult<()> {
        self.send(SessionCommand::Initialize).await
    }

    /// Drop the current session, clear failure state and connect again.
    pub async fn restart(&self) -> BotResult<()> {
        self.send(SessionCommand::Restart).await
    }

    pub async fn shutdown(&self) -> BotResult<()> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Resolve once the manager reaches `state`.
    pub async fn wait_for_state(&self, state: SessionState) -> BotResult<()> {
        let mut rx = self.watch();
        rx.wait_for(|s| s.state == state)
            .await
            .map(|_| ())
            .map_err(|_| BotError::Internal("session manager stopped".into()))
    }

    async fn send(&self, command: SessionCommand) -> BotResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BotError::Internal("session manager stopped".into()))
    }
}

pub struct SessionLifecycleManager {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<SessionCommand>,
    events_tx: mpsc::Sender<Envelope>,
    events: mpsc::Receiver<Envelope>,
    inbound: mpsc::Sender<InboundMessage>,

    state: SessionState,
    generation: u64,
    reconnect_attempts: u32,
    failure: Option<FailureCause>,
    pairing_code: Option<String>,
    session: Option<Arc<dyn TransportSession>>,
    scheduler: Scheduler,
    next_probe: Option<Instant>,
}

impl SessionLifecycleManager {
    /// Build a manager and its handle. Inbound messages from live sessions
    /// are forwarded to `inbound`.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> (Self, SessionHandle) {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            state: SessionState::Disconnected,
            reconnect_attempts: 0,
            failure: None,
            pairing_code: None,
        });
        let shared = Arc::new(Shared {
            snapshot,
            current: RwLock::new(None),
            status: StatusHub::default(),
        });
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);

        let handle = SessionHandle {
            shared: Arc::clone(&shared),
            commands: commands_tx,
        };
        let manager = Self {
            config,
            transport,
            shared,
            commands,
            events_tx,
            events,
            inbound,
            state: SessionState::Disconnected,
            generation: 0,
            reconnect_attempts: 0,
            failure: None,
            pairing_code: None,
            session: None,
            scheduler: Scheduler::new(),
            next_probe: None,
        };
        (manager, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!(transport = self.transport.name(), "Session lifecycle manager started");

        loop {
            let scheduled = self.scheduler.deadline();
            let probe_at = self.next_probe;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Initialize) => self.initialize().await,
                    Some(SessionCommand::Restart) => self.restart().await,
                    Some(SessionCommand::Shutdown) | None => break,
                },
                Some(envelope) = self.events.recv() => self.on_envelope(envelope).await,
                () = sleep_until_opt(scheduled) => {
                    if let Some(task) = self.scheduler.take_due() {
                        self.on_scheduled(task).await;
                    }
                }
                () = sleep_until_opt(probe_at) => self.probe().await,
            }
        }

        self.stop().await;
        info!("Session lifecycle manager stopped");
    }

    async fn initialize(&mut self) {
        if !self.accepts(Trigger::Initialize) {
            debug!(state = %self.state, "Initialize ignored");
            return;
        }
        self.scheduler.cancel();
        self.transition(Trigger::Initialize, "Connecting");
        self.connect().await;
    }

    async fn restart(&mut self) {
        info!(state = %self.state, "Session restart requested");
        self.scheduler.cancel();
        self.next_probe = None;
        self.release_session().await;
        self.reconnect_attempts = 0;
        self.failure = None;
        if self.state != SessionState::Disconnected {
            self.transition(Trigger::Restart, "Restarting session");
        }
        self.initialize().await;
    }

    async fn stop(&mut self) {
        self.scheduler.cancel();
        self.next_probe = None;
        self.release_session().await;
        if self.state != SessionState::Disconnected {
            self.transition(Trigger::Shutdown, "Session shut down");
        }
    }

    async fn connect(&mut self) {
        self.generation += 1;
        let sink = EventSink::new(self.generation, self.events_tx.clone());

        match timeout(self.config.connect_timeout(), self.transport.connect(sink)).await {
            Ok(Ok(session)) => {
                debug!(generation = self.generation, "Transport session started");
                self.session = Some(session);
            }
            Ok(Err(e)) if e.is_auth() => self.fail_auth(&e.to_string()).await,
            Ok(Err(e)) => self.on_lost(&format!("connect failed: {e}")).await,
            Err(_) => self.on_lost("connect timed out").await,
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        if envelope.generation != self.generation {
            debug!(
                generation = envelope.generation,
                current = self.generation,
                "Discarding event from a replaced session"
            );
            return;
        }

        match envelope.event {
            TransportEvent::Pairing { code } => {
                if self.accepts(Trigger::PairingChallenge) {
                    info!("Pairing code received, waiting for the device to be linked");
                    self.pairing_code = Some(code);
                    self.transition(Trigger::PairingChallenge, "Scan the pairing code to link the device");
                }
            }
            TransportEvent::Loading { percent, message } => {
                debug!(percent, %message, "Session loading");
                self.shared
                    .status
                    .notify(StatusUpdate::new(self.state, message).with_progress(percent));
            }
            TransportEvent::Authenticated => {
                self.transition(Trigger::Authenticated, "Authenticated");
            }
            TransportEvent::Ready => {
                if self.accepts(Trigger::HandshakeComplete) {
                    self.reconnect_attempts = 0;
                    self.failure = None;
                    self.next_probe = Some(Instant::now() + self.config.probe_interval());
                    self.transition(Trigger::HandshakeComplete, "Session ready");
                }
            }
            TransportEvent::AuthFailure { reason } => {
                if self.accepts(Trigger::AuthFailure) {
                    self.fail_auth(&reason).await;
                }
            }
            TransportEvent::Disconnected { reason } => self.on_lost(&reason).await,
            TransportEvent::Message(message) => {
                if self.inbound.send(message).await.is_err() {
                    warn!("Inbound channel closed, dropping message");
                }
            }
        }
    }

    async fn on_scheduled(&mut self, task: ScheduledTask) {
        match task {
            ScheduledTask::Reconnect => {
                if !self.accepts(Trigger::ReconnectAllowed) {
                    return;
                }
                self.reconnect_attempts += 1;
                let message = format!(
                    "Reconnecting (attempt {}/{})",
                    self.reconnect_attempts, self.config.max_reconnect_attempts
                );
                self.transition(Trigger::ReconnectAllowed, message);
                self.connect().await;
            }
            ScheduledTask::CooldownReset => {
                if self.failure != Some(FailureCause::ReconnectsExhausted)
                    || !self.accepts(Trigger::CooldownElapsed)
                {
                    return;
                }
                self.reconnect_attempts = 0;
                self.failure = None;
                self.transition(Trigger::CooldownElapsed, "Cool-down elapsed, retrying");
                self.schedule_reconnect();
            }
        }
    }

    async fn probe(&mut self) {
        self.next_probe = Some(Instant::now() + self.config.probe_interval());
        let Some(session) = self.session.clone() else {
            return;
        };

        match timeout(self.config.probe_timeout(), session.probe()).await {
            Ok(Ok(())) => debug!("Health probe ok"),
            Ok(Err(e)) => self.on_lost(&format!("health probe failed: {e}")).await,
            Err(_) => self.on_lost("health probe timed out").await,
        }
    }

    /// The session dropped or never came up.
    async fn on_lost(&mut self, reason: &str) {
        if !self.accepts(Trigger::Disconnect) {
            debug!(state = %self.state, reason, "Disconnect ignored");
            return;
        }
        warn!(state = %self.state, reason, "Session lost");
        self.next_probe = None;
        self.transition(Trigger::Disconnect, format!("Disconnected: {reason}"));
        self.release_session().await;
        self.schedule_reconnect();
    }

    async fn fail_auth(&mut self, reason: &str) {
        error!(reason, "Session authentication failed, restart required");
        self.scheduler.cancel();
        self.next_probe = None;
        self.failure = Some(FailureCause::AuthRejected);
        self.transition(Trigger::AuthFailure, format!("Authentication failed: {reason}"));
        self.release_session().await;
    }

    /// Attempt n waits n × interval; past the limit, park in `Failed`.
    fn schedule_reconnect(&mut self) {
        let max = self.config.max_reconnect_attempts;
        if self.reconnect_attempts >= max {
            error!(attempts = self.reconnect_attempts, "Reconnect attempts exhausted");
            self.failure = Some(FailureCause::ReconnectsExhausted);
            self.scheduler
                .schedule(ScheduledTask::CooldownReset, self.config.reconnect_cooldown());
            self.transition(
                Trigger::ReconnectRefused,
                format!("Giving up after {max} reconnect attempts"),
            );
            return;
        }

        let attempt = self.reconnect_attempts + 1;
        let delay = self.config.reconnect_interval() * attempt;
        info!(attempt, max, delay_secs = delay.as_secs(), "Scheduling reconnect");
        self.scheduler.schedule(ScheduledTask::Reconnect, delay);
    }

    async fn release_session(&mut self) {
        // Anything the old session still emits is stale from here on
        self.generation += 1;
        let Some(session) = self.session.take() else {
            return;
        };
        self.expose_session();
        match timeout(CLOSE_TIMEOUT, session.close()).await {
            Ok(Ok(())) => debug!("Transport session closed"),
            Ok(Err(e)) => warn!(error = %e, "Failed to close transport session"),
            Err(_) => warn!("Timed out closing transport session"),
        }
    }

    fn accepts(&self, trigger: Trigger) -> bool {
        self.state.next(trigger).is_some()
    }

    fn transition(&mut self, trigger: Trigger, message: impl Into<String>) -> bool {
        let Some(next) = self.state.next(trigger) else {
            debug!(state = %self.state, ?trigger, "Ignoring trigger");
            return false;
        };

        let previous = self.state;
        self.state = next;
        if next != SessionState::AwaitingPairing {
            self.pairing_code = None;
        }

        let message = message.into();
        info!(from = %previous, to = %next, "{message}");

        self.expose_session();
        self.shared.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            failure: self.failure,
            pairing_code: self.pairing_code.clone(),
        });
        self.shared
            .status
            .publish(StatusUpdate::new(next, message).with_pairing_code(self.pairing_code.clone()));
        true
    }

    fn expose_session(&self) {
        let exposed = if self.state.is_usable() {
            self.session.clone()
        } else {
            None
        };
        if let Ok(mut current) = self.shared.current.write() {
            *current = exposed;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
