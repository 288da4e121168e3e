//! Integration tests for the session lifecycle manager.
//!
//! Time is paused, so reconnect spacing, cool-downs and probe periods run
//! instantly and can be asserted exactly.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{test_config, wait_for, ConnectPlan, MockTransport};
use showtime_bot::{
    BotError, FailureCause, InboundMessage, SessionHandle, SessionLifecycleManager, SessionState,
    TransportEvent,
};

fn start(transport: std::sync::Arc<MockTransport>) -> (SessionHandle, mpsc::Receiver<InboundMessage>) {
    let (tx, rx) = mpsc::channel(16);
    let (manager, handle) = SessionLifecycleManager::new(test_config().session, transport, tx);
    manager.spawn();
    (handle, rx)
}

fn assert_gap(from: Instant, to: Instant, expected: Duration) {
    let gap = to - from;
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(100),
        "expected ~{expected:?}, got {gap:?}"
    );
}

// ============================================================================
// Establishing a session
// ============================================================================

#[tokio::test(start_paused = true)]
async fn pairing_flow_reaches_ready() {
    let transport = MockTransport::with_plans(vec![ConnectPlan::Pairing("2@qr-code".into())]);
    let (handle, _rx) = start(transport.clone());
    assert_eq!(handle.state(), SessionState::Disconnected);

    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::AwaitingPairing).await;
    assert_eq!(handle.snapshot().pairing_code.as_deref(), Some("2@qr-code"));
    assert!(handle.current_session().is_none());

    // A late observer sees the code without waiting for the next update
    let (current, _updates) = handle.subscribe();
    let current = current.unwrap();
    assert_eq!(current.state, SessionState::AwaitingPairing);
    assert_eq!(current.pairing_code.as_deref(), Some("2@qr-code"));

    transport.emit(TransportEvent::Authenticated).await;
    transport.emit(TransportEvent::Ready).await;
    wait_for(&handle, SessionState::Ready).await;

    assert!(handle.current_session().is_some());
    assert_eq!(handle.snapshot().pairing_code, None);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn observers_receive_every_transition() {
    let transport = MockTransport::new();
    let (handle, _rx) = start(transport.clone());
    let (_, mut updates) = handle.subscribe();

    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;

    let mut states = Vec::new();
    while let Ok(update) = updates.try_recv() {
        states.push(update.state);
    }
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Authenticated,
            SessionState::Ready
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_are_forwarded() {
    let transport = MockTransport::new();
    let (handle, mut rx) = start(transport.clone());
    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;

    transport
        .emit(TransportEvent::Message(InboundMessage::text("ana", "hola")))
        .await;

    let message = rx.recv().await.unwrap();
    assert_eq!(message.identity, "ana");
    assert_eq!(message.text_content(), Some("hola"));
}

// ============================================================================
// Authentication failure
// ============================================================================

#[tokio::test(start_paused = true)]
async fn auth_failure_is_terminal_until_restart() {
    let transport = MockTransport::with_plans(vec![ConnectPlan::Pairing("code".into())]);
    let (handle, _rx) = start(transport.clone());

    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::AwaitingPairing).await;
    transport
        .emit(TransportEvent::AuthFailure {
            reason: "credentials revoked".into(),
        })
        .await;
    wait_for(&handle, SessionState::Failed).await;
    assert_eq!(handle.snapshot().failure, Some(FailureCause::AuthRejected));

    // No cool-down applies to auth failures
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert_eq!(handle.state(), SessionState::Failed);
    assert_eq!(transport.connect_count(), 1);

    handle.restart().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(handle.snapshot().failure, None);
}

#[tokio::test(start_paused = true)]
async fn auth_error_from_connect_fails_session() {
    let transport = MockTransport::with_plans(vec![ConnectPlan::Fail(BotError::Auth(
        "session file invalid".into(),
    ))]);
    let (handle, _rx) = start(transport.clone());

    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Failed).await;
    assert_eq!(handle.snapshot().failure, Some(FailureCause::AuthRejected));
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn disconnect_reconnects_and_resets_counter() {
    let transport = MockTransport::new();
    let (handle, _rx) = start(transport.clone());
    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;
    let first = transport.session(0);

    transport
        .emit(TransportEvent::Disconnected {
            reason: "NAVIGATION".into(),
        })
        .await;
    wait_for(&handle, SessionState::Disconnected).await;
    assert!(handle.current_session().is_none());

    wait_for(&handle, SessionState::Ready).await;
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(handle.snapshot().reconnect_attempts, 0);
    assert!(first.closed.load(Ordering::SeqCst));

    let times = transport.connect_times();
    assert_gap(times[0], times[1], Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn reconnects_are_linear_and_bounded() {
    let refused = || ConnectPlan::Fail(BotError::Connection("ECONNREFUSED".into()));
    let transport =
        MockTransport::with_plans(vec![ConnectPlan::Ready, refused(), refused(), refused()]);
    let (handle, _rx) = start(transport.clone());

    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;
    transport
        .emit(TransportEvent::Disconnected {
            reason: "CONFLICT".into(),
        })
        .await;

    wait_for(&handle, SessionState::Failed).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.failure, Some(FailureCause::ReconnectsExhausted));
    assert_eq!(snapshot.reconnect_attempts, 3);

    // Attempt n waits n × 10 s
    let times = transport.connect_times();
    assert_eq!(times.len(), 4);
    assert_gap(times[0], times[1], Duration::from_secs(10));
    assert_gap(times[1], times[2], Duration::from_secs(20));
    assert_gap(times[2], times[3], Duration::from_secs(30));

    // After the cool-down the counter resets and the next attempt succeeds
    wait_for(&handle, SessionState::Ready).await;
    let times = transport.connect_times();
    assert_eq!(times.len(), 5);
    assert_gap(times[3], times[4], Duration::from_secs(600 + 10));
    assert_eq!(handle.snapshot().reconnect_attempts, 0);
    assert_eq!(handle.snapshot().failure, None);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_counts_as_disconnect() {
    let transport = MockTransport::new();
    let (handle, _rx) = start(transport.clone());
    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;
    let ready_at = Instant::now();

    transport.session(0).healthy.store(false, Ordering::SeqCst);
    wait_for(&handle, SessionState::Disconnected).await;
    assert_gap(ready_at, Instant::now(), Duration::from_secs(300));

    wait_for(&handle, SessionState::Ready).await;
    assert_eq!(transport.connect_count(), 2);
    assert!(transport.session(0).closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn healthy_probe_keeps_session() {
    let transport = MockTransport::new();
    let (handle, _rx) = start(transport.clone());
    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;

    tokio::time::sleep(Duration::from_secs(3 * 300 + 1)).await;
    assert_eq!(handle.state(), SessionState::Ready);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn events_from_replaced_session_are_ignored() {
    let transport = MockTransport::new();
    let (handle, _rx) = start(transport.clone());
    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;

    transport
        .emit(TransportEvent::Disconnected {
            reason: "CONFLICT".into(),
        })
        .await;
    wait_for(&handle, SessionState::Disconnected).await;
    wait_for(&handle, SessionState::Ready).await;

    // The first session is gone; its late disconnect must not tear down the new one
    transport
        .emit_on(
            0,
            TransportEvent::Disconnected {
                reason: "late".into(),
            },
        )
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state(), SessionState::Ready);
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_session() {
    let transport = MockTransport::new();
    let (handle, _rx) = start(transport.clone());
    handle.initialize().await.unwrap();
    wait_for(&handle, SessionState::Ready).await;

    handle.shutdown().await.unwrap();
    wait_for(&handle, SessionState::Disconnected).await;
    assert!(transport.session(0).closed.load(Ordering::SeqCst));
    assert!(handle.current_session().is_none());
}
