//! Scripted in-memory backend and client used by the bridge tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::aggregator::OutputAggregator;
use super::frame::Frame;
use crate::backend::{ShellBackend, ShellExit, StdinWriter, TermSize};
use crate::client::{ClientConnection, Inbound};
use crate::error::{BackendError, ClientError};

/// Ordered record of teardown-relevant events across backend and client.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<StdMutex<Vec<&'static str>>>);

impl EventLog {
    pub(crate) fn push(&self, event: &'static str) {
        self.0.lock().unwrap().push(event);
    }

    pub(crate) fn snapshot(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.snapshot().iter().filter(|e| **e == event).count()
    }

    pub(crate) fn first(&self, event: &str) -> Option<usize> {
        self.snapshot().iter().position(|e| *e == event)
    }

    pub(crate) fn last(&self, event: &str) -> Option<usize> {
        self.snapshot().iter().rposition(|e| *e == event)
    }
}

/// Stdin writer that records when the bridge lets go of it.
struct RecordingWriter {
    inner: DuplexStream,
    events: EventLog,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        self.events.push("stdin.closed");
    }
}

/// A shell that only does what the test tells it to.
pub(crate) struct MockBackend {
    events: EventLog,
    fail_pty: bool,
    size: StdMutex<Option<TermSize>>,
    resizes: AtomicUsize,
    probes: StdMutex<VecDeque<bool>>,
    probe_count: AtomicUsize,
    stdin: StdMutex<Option<StdinWriter>>,
    stdin_peer: Mutex<DuplexStream>,
    output: StdMutex<Option<Arc<OutputAggregator>>>,
    exit_tx: StdMutex<Option<oneshot::Sender<i32>>>,
    exit_rx: Mutex<Option<oneshot::Receiver<i32>>>,
    closed: CancellationToken,
}

impl MockBackend {
    pub(crate) fn new(events: EventLog) -> Self {
        let (writer, peer) = tokio::io::duplex(4096);
        let (exit_tx, exit_rx) = oneshot::channel();
        Self {
            fail_pty: false,
            size: StdMutex::new(None),
            resizes: AtomicUsize::new(0),
            probes: StdMutex::new(VecDeque::new()),
            probe_count: AtomicUsize::new(0),
            stdin: StdMutex::new(Some(Box::new(RecordingWriter {
                inner: writer,
                events: events.clone(),
            }))),
            stdin_peer: Mutex::new(peer),
            output: StdMutex::new(None),
            exit_tx: StdMutex::new(Some(exit_tx)),
            exit_rx: Mutex::new(Some(exit_rx)),
            closed: CancellationToken::new(),
            events,
        }
    }

    pub(crate) fn failing_pty(mut self) -> Self {
        self.fail_pty = true;
        self
    }

    /// Probe outcomes in order (`false` = failure); success once exhausted.
    pub(crate) fn with_probes(self, script: &[bool]) -> Self {
        self.probes.lock().unwrap().extend(script.iter().copied());
        self
    }

    /// Produce shell output.
    pub(crate) async fn emit(&self, data: &[u8]) {
        let sink = self.output.lock().unwrap().clone();
        sink.expect("output not attached").write(data).await;
    }

    /// Terminate the shell with `code`.
    pub(crate) fn exit(&self, code: i32) {
        if let Some(tx) = self.exit_tx.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    }

    /// Read exactly `n` bytes the bridge wrote to stdin.
    pub(crate) async fn read_stdin(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        let mut peer = self.stdin_peer.lock().await;
        tokio::time::timeout(Duration::from_secs(1), peer.read_exact(&mut buf))
            .await
            .expect("timed out reading stdin")
            .expect("stdin read failed");
        buf
    }

    pub(crate) fn size(&self) -> Option<TermSize> {
        *self.size.lock().unwrap()
    }

    pub(crate) fn resizes(&self) -> usize {
        self.resizes.load(Ordering::SeqCst)
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probe_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellBackend for MockBackend {
    async fn request_pty(&self, size: TermSize) -> Result<(), BackendError> {
        if self.fail_pty {
            return Err(BackendError::Pty("no pty devices left".into()));
        }
        *self.size.lock().unwrap() = Some(size);
        Ok(())
    }

    fn take_stdin(&self) -> Result<StdinWriter, BackendError> {
        self.stdin.lock().unwrap().take().ok_or(BackendError::StdinTaken)
    }

    fn attach_output(&self, sink: Arc<OutputAggregator>) {
        *self.output.lock().unwrap() = Some(sink);
    }

    async fn start_shell(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn resize(&self, size: TermSize) -> Result<(), BackendError> {
        self.resizes.fetch_add(1, Ordering::SeqCst);
        *self.size.lock().unwrap() = Some(size);
        Ok(())
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        match self.probes.lock().unwrap().pop_front() {
            Some(false) => Err(BackendError::Probe("no route to host".into())),
            _ => Ok(()),
        }
    }

    async fn wait(&self) -> Result<ShellExit, BackendError> {
        let rx = self.exit_rx.lock().await.take();
        let Some(rx) = rx else {
            return Err(BackendError::NotStarted);
        };
        tokio::select! {
            code = rx => code.map(|code| ShellExit { code }).map_err(|_| BackendError::Closed),
            () = self.closed.cancelled() => Err(BackendError::Closed),
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.events.push("backend.close");
        self.closed.cancel();
        Ok(())
    }
}

type InboundItem = Result<Option<Inbound>, ClientError>;

struct ClientInner {
    inbound: Mutex<mpsc::UnboundedReceiver<InboundItem>>,
    frames: StdMutex<Vec<Vec<u8>>>,
    events: EventLog,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    closed: AtomicBool,
}

/// In-memory client connection. Clones share state.
#[derive(Clone)]
pub(crate) struct MockClient {
    inner: Arc<ClientInner>,
}

/// Test-side handle that feeds frames to a [`MockClient`].
pub(crate) struct ClientHandle {
    tx: mpsc::UnboundedSender<InboundItem>,
}

impl ClientHandle {
    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.tx.send(Ok(Some(Inbound::Text(text.to_string()))));
    }

    pub(crate) fn send_frame(&self, frame: &Frame) {
        self.send_text(&frame.to_json().unwrap());
    }

    pub(crate) fn send_binary(&self, data: &[u8]) {
        let _ = self.tx.send(Ok(Some(Inbound::Binary(data.to_vec()))));
    }

    /// Peer closes cleanly.
    pub(crate) fn hang_up(&self) {
        let _ = self.tx.send(Ok(None));
    }

    /// Peer's transport breaks.
    pub(crate) fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(ClientError::Transport(reason.to_string())));
    }
}

impl MockClient {
    pub(crate) fn new() -> (Self, ClientHandle) {
        Self::with_events(EventLog::default())
    }

    pub(crate) fn with_events(events: EventLog) -> (Self, ClientHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            inner: Arc::new(ClientInner {
                inbound: Mutex::new(rx),
                frames: StdMutex::new(Vec::new()),
                events,
                fail_writes: AtomicBool::new(false),
                stall_writes: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        };
        (client, ClientHandle { tx })
    }

    pub(crate) fn fail_writes(&self) {
        self.inner.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Every later write hangs, like a peer that stopped reading.
    pub(crate) fn stall_writes(&self) {
        self.inner.stall_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        self.inner.frames.lock().unwrap().clone()
    }

    /// All output bytes in arrival order.
    pub(crate) fn received(&self) -> Vec<u8> {
        self.frames().concat()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientConnection for MockClient {
    async fn read_frame(&self) -> Result<Option<Inbound>, ClientError> {
        match self.inner.inbound.lock().await.recv().await {
            Some(item) => item,
            None => Ok(None),
        }
    }

    async fn write_frame(&self, data: Vec<u8>) -> Result<(), ClientError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("broken pipe".into()));
        }
        if self.inner.stall_writes.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        self.inner.frames.lock().unwrap().push(data);
        self.inner.events.push("client.write");
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.events.push("client.close");
        Ok(())
    }
}
