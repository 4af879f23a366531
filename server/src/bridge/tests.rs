use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use super::frame::Frame;
use super::testing::{ClientHandle, EventLog, MockBackend, MockClient};
use super::{Bridge, BridgeOptions, BridgeState};
use crate::backend::TermSize;
use crate::error::{BackendError, BridgeError, ClientError};

/// Upper bound on how long `run` may take to return after the session ends.
const TEARDOWN: Duration = Duration::from_secs(1);

struct Harness {
    backend: Arc<MockBackend>,
    client: MockClient,
    peer: ClientHandle,
    events: EventLog,
    bridge: Arc<Bridge<MockBackend, MockClient>>,
    stop: CancellationToken,
}

fn fast_options() -> BridgeOptions {
    BridgeOptions {
        flush_interval: Duration::from_millis(10),
        keepalive_interval: Duration::from_secs(3600),
        keepalive_max_failures: 3,
        drain_timeout: Duration::from_millis(200),
    }
}

async fn harness_with(
    configure: impl FnOnce(MockBackend) -> MockBackend,
    options: BridgeOptions,
) -> Harness {
    let events = EventLog::default();
    let backend = Arc::new(configure(MockBackend::new(events.clone())));
    let (client, peer) = MockClient::with_events(events.clone());
    let bridge = Bridge::new(
        Arc::clone(&backend),
        client.clone(),
        TermSize::new(80, 24),
        options,
        Span::none(),
    )
    .await
    .unwrap();
    Harness {
        backend,
        client,
        peer,
        events,
        bridge: Arc::new(bridge),
        stop: CancellationToken::new(),
    }
}

async fn harness() -> Harness {
    harness_with(|b| b, fast_options()).await
}

impl Harness {
    fn start(&self) -> JoinHandle<Result<(), BridgeError>> {
        let bridge = Arc::clone(&self.bridge);
        let stop = self.stop.clone();
        tokio::spawn(async move { bridge.run(stop).await })
    }

    fn assert_teardown_order(&self) {
        let stdin = self.events.first("stdin.closed").expect("stdin never closed");
        let backend = self
            .events
            .first("backend.close")
            .expect("backend never closed");
        assert!(stdin < backend, "stdin must close before the backend");
        assert_eq!(self.events.count("backend.close"), 1);
        assert_eq!(self.events.count("stdin.closed"), 1);
    }
}

async fn finish(task: JoinHandle<Result<(), BridgeError>>) -> Result<(), BridgeError> {
    tokio::time::timeout(TEARDOWN, task)
        .await
        .expect("run did not return within the teardown bound")
        .expect("run panicked")
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEARDOWN;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn clean_exit_delivers_last_output_and_returns_ok() {
    let h = harness().await;
    let task = h.start();

    h.backend.emit(b"$ make\n").await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.backend.emit(b"build ok MARKER-7f3a\n").await;
    h.backend.exit(0);

    finish(task).await.unwrap();

    assert_eq!(h.client.received(), b"$ make\nbuild ok MARKER-7f3a\n");
    let last_write = h.events.last("client.write").unwrap();
    let close = h.events.first("client.close").unwrap();
    assert!(last_write < close, "final flush must precede client close");
    assert!(h.client.is_closed());
    assert_eq!(h.bridge.state(), BridgeState::Closed);
    h.assert_teardown_order();
}

#[tokio::test]
async fn output_is_flushed_while_running() {
    let h = harness().await;
    let task = h.start();

    h.backend.emit(b"prompt$ ").await;
    eventually("periodic flush", || h.client.received() == b"prompt$ ").await;
    assert_eq!(h.bridge.state(), BridgeState::Running);

    h.stop.cancel();
    finish(task).await.unwrap();
}

#[tokio::test]
async fn non_zero_exit_is_reported() {
    let h = harness().await;
    let task = h.start();
    h.backend.exit(2);

    let err = finish(task).await.unwrap_err();
    assert!(matches!(err, BridgeError::ShellExited { code: 2 }));
    h.assert_teardown_order();
}

#[tokio::test]
async fn cmd_frames_reach_stdin() {
    let h = harness().await;
    let task = h.start();

    h.peer.send_frame(&Frame::cmd(b"uname -a\n"));
    assert_eq!(h.backend.read_stdin(9).await, b"uname -a\n");

    h.peer.send_binary(b"\x03");
    assert_eq!(h.backend.read_stdin(1).await, b"\x03");

    h.backend.exit(0);
    finish(task).await.unwrap();
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_skipped() {
    let h = harness().await;
    let task = h.start();

    h.peer.send_text("{definitely not json");
    h.peer.send_text(r#"{"type":"cmd","cmd":"%%%"}"#);
    h.peer.send_text(r#"{"type":"resize","cols":0,"rows":0}"#);
    h.peer.send_text(r#"{"type":"clipboard","data":"x"}"#);
    h.peer.send_frame(&Frame::heartbeat());
    h.peer.send_frame(&Frame::cmd(b"ls\n"));

    assert_eq!(h.backend.read_stdin(3).await, b"ls\n");
    assert_eq!(h.bridge.state(), BridgeState::Running);
    assert_eq!(h.backend.resizes(), 0);

    h.backend.exit(0);
    finish(task).await.unwrap();
}

#[tokio::test]
async fn repeated_resize_is_idempotent() {
    let h = harness().await;
    let task = h.start();

    for _ in 0..5 {
        h.peer.send_frame(&Frame::resize(132, 43));
    }
    eventually("five resizes", || h.backend.resizes() == 5).await;
    assert_eq!(h.backend.size(), Some(TermSize::new(132, 43)));

    h.peer.send_frame(&Frame::resize(100, 30));
    eventually("sixth resize", || h.backend.resizes() == 6).await;
    assert_eq!(h.backend.size(), Some(TermSize::new(100, 30)));

    h.stop.cancel();
    finish(task).await.unwrap();
}

#[tokio::test]
async fn probe_failures_below_threshold_are_tolerated() {
    let options = BridgeOptions {
        keepalive_interval: Duration::from_millis(10),
        ..fast_options()
    };
    let h = harness_with(
        |b| b.with_probes(&[false, false, true, false, false, true]),
        options,
    )
    .await;
    let task = h.start();

    eventually("script exhausted", || h.backend.probe_count() >= 8).await;
    assert!(!task.is_finished());
    assert_eq!(h.bridge.state(), BridgeState::Running);

    h.stop.cancel();
    finish(task).await.unwrap();
}

#[tokio::test]
async fn consecutive_probe_failures_end_the_session() {
    let options = BridgeOptions {
        keepalive_interval: Duration::from_millis(10),
        ..fast_options()
    };
    let h = harness_with(|b| b.with_probes(&[false, false, false]), options).await;
    let task = h.start();

    let err = finish(task).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Unresponsive(BackendError::Probe(_))
    ));
    assert_eq!(h.backend.probe_count(), 3);
    h.assert_teardown_order();
}

#[tokio::test]
async fn client_read_failure_is_fatal() {
    let h = harness().await;
    let task = h.start();
    h.backend.emit(b"partial").await;
    h.peer.fail("connection reset by peer");

    let err = finish(task).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Client(ClientError::Transport(_))
    ));
    h.assert_teardown_order();
}

#[tokio::test]
async fn client_hang_up_is_graceful() {
    let h = harness().await;
    let task = h.start();
    h.peer.hang_up();

    finish(task).await.unwrap();
    h.assert_teardown_order();
}

#[tokio::test]
async fn client_write_failure_is_fatal() {
    let h = harness().await;
    let task = h.start();
    h.client.fail_writes();
    h.backend.emit(b"lost").await;

    let err = finish(task).await.unwrap_err();
    assert!(matches!(err, BridgeError::Client(_)));
    assert!(h.client.is_closed());
}

#[tokio::test]
async fn stop_while_shell_blocks_on_stdin_tears_down() {
    let h = harness().await;
    let task = h.start();

    // The mock shell never exits on its own and never reads stdin.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.stop.cancel();

    finish(task).await.unwrap();
    h.assert_teardown_order();
    assert!(h.client.is_closed());
}

#[tokio::test]
async fn stop_while_stdin_write_is_blocked_tears_down() {
    let h = harness().await;
    let task = h.start();

    // Twice the mock's stdin pipe capacity; nothing reads it.
    h.peer.send_frame(&Frame::cmd(&vec![b'x'; 8192]));
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.stop.cancel();

    finish(task).await.unwrap();
    h.assert_teardown_order();
    assert_eq!(h.backend.read_stdin(4096).await, vec![b'x'; 4096]);
}

#[tokio::test]
async fn stalled_final_flush_is_abandoned() {
    let h = harness().await;
    let task = h.start();
    h.client.stall_writes();
    h.backend.emit(b"never delivered").await;
    h.stop.cancel();

    let err = finish(task).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Client(ClientError::Transport(_))
    ));
    assert!(h.client.is_closed());
    assert!(h.client.received().is_empty());
    assert_eq!(h.bridge.state(), BridgeState::Closed);
    h.assert_teardown_order();
}

#[tokio::test]
async fn stalled_periodic_flush_still_stops() {
    let h = harness().await;
    let task = h.start();
    h.client.stall_writes();
    h.backend.emit(b"stuck").await;
    // Let the flush loop block inside the write.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.backend.exit(0);

    // The clean exit halted first; the abandoned flush doesn't override it.
    finish(task).await.unwrap();
    assert!(h.client.is_closed());
    h.assert_teardown_order();
}

#[tokio::test]
async fn zero_periods_are_clamped() {
    let options = BridgeOptions {
        flush_interval: Duration::ZERO,
        keepalive_interval: Duration::ZERO,
        ..fast_options()
    };
    let h = harness_with(|b| b, options).await;
    let task = h.start();

    h.backend.emit(b"tick").await;
    eventually("flush", || h.client.received() == b"tick").await;
    assert!(h.backend.probe_count() > 0);

    h.backend.exit(0);
    finish(task).await.unwrap();
}

#[tokio::test]
async fn close_during_run_forces_termination() {
    let h = harness().await;
    let task = h.start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.bridge.close().await.unwrap();
    h.bridge.close().await.unwrap();

    finish(task).await.unwrap();
    h.assert_teardown_order();
}

#[tokio::test]
async fn run_only_once() {
    let h = harness().await;
    let task = h.start();
    h.backend.exit(0);
    finish(task).await.unwrap();

    let again = h.bridge.run(CancellationToken::new()).await;
    assert!(matches!(again, Err(BridgeError::AlreadyRun)));
}

#[tokio::test]
async fn state_moves_through_lifecycle() {
    let h = harness().await;
    let mut states = h.bridge.subscribe();
    assert_eq!(*states.borrow(), BridgeState::Created);

    let task = h.start();
    states
        .wait_for(|s| *s == BridgeState::Running)
        .await
        .unwrap();

    h.backend.exit(0);
    finish(task).await.unwrap();
    assert_eq!(h.bridge.state(), BridgeState::Closed);
}

#[tokio::test]
async fn construction_fails_without_pty() {
    let events = EventLog::default();
    let backend = Arc::new(MockBackend::new(events.clone()).failing_pty());
    let (client, _peer) = MockClient::with_events(events);
    let res = Bridge::new(
        backend,
        client,
        TermSize::default(),
        BridgeOptions::default(),
        Span::none(),
    )
    .await;
    assert!(matches!(res, Err(BridgeError::Backend(BackendError::Pty(_)))));
}

#[test]
fn options_from_config() {
    let cfg = crate::config::BridgeConfig::default();
    assert_eq!(BridgeOptions::from(&cfg), BridgeOptions::default());
}
