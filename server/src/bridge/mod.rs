//! Interactive session bridge: one backend shell ↔ one framed client.
//!
//! ## Tasks
//!
//! [`Bridge::run`] drives five cooperative tasks under one cancellation scope:
//!
//! | Task     | Waits on                      | Ends the session when             |
//! |----------|-------------------------------|-----------------------------------|
//! | input    | next client frame             | the client read fails or closes   |
//! | output   | flush tick                    | a client write fails              |
//! | health   | probe tick                    | too many probes fail in a row     |
//! | exit     | backend termination           | the shell exits                   |
//! | closer   | scope cancellation            | never (it only closes the client) |
//!
//! The first task to halt cancels the scope. The output task then performs a
//! final flush, and only after that does the closer close the client, so the
//! last bytes the shell wrote always reach the client before the close.
//!
//! ## Teardown ordering
//!
//! [`Bridge::close`] shuts the stdin writer before force-closing the backend.
//! Anything inside the backend copying from stdin sees EOF and exits instead
//! of blocking the backend close.

pub mod aggregator;
pub mod frame;
mod group;
mod health;
mod input;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use self::aggregator::OutputAggregator;
use self::group::{Halt, TaskGroup};
use self::input::StdinSlot;
use crate::backend::{ShellBackend, TermSize};
use crate::client::ClientConnection;
use crate::config::BridgeConfig;
use crate::error::{BackendError, BridgeError, ClientError};

/// Timing knobs for a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// How often buffered output is sent to the client (default 60 ms).
    pub flush_interval: Duration,
    /// How often the backend is probed (default 15 s).
    pub keepalive_interval: Duration,
    /// Consecutive probe failures tolerated before the session is declared
    /// dead (default 3).
    pub keepalive_max_failures: u32,
    /// Upper bound on the final flush, and separately on the client close,
    /// once the session is ending (default 500 ms).
    pub drain_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(60),
            keepalive_interval: Duration::from_secs(15),
            keepalive_max_failures: 3,
            drain_timeout: Duration::from_millis(500),
        }
    }
}

impl BridgeOptions {
    /// Raise zero periods to 1 ms; `tokio::time::interval` rejects zero.
    fn clamped(self) -> Self {
        let min = Duration::from_millis(1);
        Self {
            flush_interval: self.flush_interval.max(min),
            keepalive_interval: self.keepalive_interval.max(min),
            drain_timeout: self.drain_timeout.max(min),
            ..self
        }
    }
}

impl From<&BridgeConfig> for BridgeOptions {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            flush_interval: Duration::from_millis(cfg.flush_interval_ms),
            keepalive_interval: Duration::from_secs(cfg.keepalive_interval_secs),
            keepalive_max_failures: cfg.keepalive_max_failures,
            drain_timeout: Duration::from_millis(cfg.drain_timeout_ms),
        }
    }
}

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Running,
    Draining,
    Closed,
}

impl BridgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// One backend shell exposed to one client connection.
pub struct Bridge<B: ShellBackend, C: ClientConnection> {
    backend: Arc<B>,
    client: C,
    output: Arc<OutputAggregator>,
    stdin: StdinSlot,
    options: BridgeOptions,
    size: TermSize,
    span: Span,
    scope: CancellationToken,
    state: watch::Sender<BridgeState>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl<B: ShellBackend, C: ClientConnection> Bridge<B, C> {
    /// Open the PTY, wire stdin/stdout and start the shell.
    ///
    /// `span` is the logging context every bridge task runs in.
    pub async fn new(
        backend: Arc<B>,
        client: C,
        size: TermSize,
        options: BridgeOptions,
        span: Span,
    ) -> Result<Self, BridgeError> {
        let output = Arc::new(OutputAggregator::new());
        let stdin = async {
            backend.request_pty(size).await?;
            let stdin = backend.take_stdin()?;
            backend.attach_output(Arc::clone(&output));
            if let Err(e) = backend.start_shell().await {
                let _ = backend.close().await;
                return Err(e);
            }
            debug!(cols = size.cols, rows = size.rows, "shell started");
            Ok::<_, BackendError>(stdin)
        }
        .instrument(span.clone())
        .await?;

        Ok(Self {
            backend,
            client,
            output,
            stdin: StdinSlot::new(stdin),
            options: options.clamped(),
            size,
            span,
            scope: CancellationToken::new(),
            state: watch::channel(BridgeState::Created).0,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Bytes the shell has produced so far.
    pub fn bytes_out(&self) -> u64 {
        self.output.total_written()
    }

    /// Bridge bytes until the session ends.
    ///
    /// Returns `Ok(())` when the client hung up, the shell exited with status
    /// 0, or `stop` was cancelled; otherwise the first error that ended the
    /// session. May only be called once.
    pub async fn run(&self, stop: CancellationToken) -> Result<(), BridgeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyRun);
        }
        self.run_tasks(stop).instrument(self.span.clone()).await
    }

    async fn run_tasks(&self, stop: CancellationToken) -> Result<(), BridgeError> {
        let scope = &self.scope;
        let group = TaskGroup::new(scope.clone());
        let flushed = CancellationToken::new();

        self.state.send_replace(BridgeState::Running);
        info!(
            cols = self.size.cols,
            rows = self.size.rows,
            "session bridge running"
        );

        let forward_stop = async {
            tokio::select! {
                () = stop.cancelled() => {
                    info!("stop requested");
                    scope.cancel();
                }
                () = scope.cancelled() => {}
            }
        };

        tokio::join!(
            forward_stop,
            group.run(
                "input",
                input::relay_input(&self.client, &*self.backend, &self.stdin, scope),
            ),
            group.run("output", self.pump_output(&flushed)),
            group.run(
                "health",
                health::monitor(
                    &*self.backend,
                    self.options.keepalive_interval,
                    self.options.keepalive_max_failures,
                    scope,
                ),
            ),
            group.run("exit", self.watch_exit()),
            group.run("closer", self.close_client(&flushed)),
        );

        if let Err(e) = self.close().await {
            debug!("closing backend: {e}");
        }
        self.state.send_replace(BridgeState::Closed);

        let result = group.finish();
        match &result {
            Ok(()) => info!(bytes = self.bytes_out(), "session bridge closed"),
            Err(e) => warn!(bytes = self.bytes_out(), "session bridge failed: {e}"),
        }
        result
    }

    /// Periodic flush, then the mandatory final flush.
    ///
    /// Once the scope is cancelled the loop gets `drain_timeout` to finish; a
    /// client that stops accepting writes loses whatever is still buffered.
    async fn pump_output(&self, flushed: &CancellationToken) -> Result<(), Halt> {
        // Signals the closer on every exit path, including write failure.
        let _done = flushed.clone().drop_guard();
        let deadline = async {
            self.scope.cancelled().await;
            tokio::time::sleep(self.options.drain_timeout).await;
        };
        tokio::select! {
            res = self.output.run_flush_loop(&self.client, self.options.flush_interval, &self.scope) => {
                res?;
                Ok(())
            }
            () = deadline => {
                warn!(
                    timeout = ?self.options.drain_timeout,
                    "client stopped accepting output, dropping final flush"
                );
                Err(ClientError::Transport("final flush timed out".into()).into())
            }
        }
    }

    /// Close the client only once the final flush has completed or been
    /// abandoned.
    async fn close_client(&self, flushed: &CancellationToken) -> Result<(), Halt> {
        self.scope.cancelled().await;
        self.state.send_replace(BridgeState::Draining);
        flushed.cancelled().await;
        match tokio::time::timeout(self.options.drain_timeout, self.client.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("closing client: {e}"),
            Err(_) => warn!("client close timed out"),
        }
        Ok(())
    }

    /// Wait for the shell to exit, or tear the backend down on stop.
    async fn watch_exit(&self) -> Result<(), Halt> {
        let (tx, rx) = oneshot::channel();
        let backend = Arc::clone(&self.backend);
        tokio::spawn(
            async move {
                let _ = tx.send(backend.wait().await);
            }
            .instrument(Span::current()),
        );

        tokio::select! {
            () = self.scope.cancelled() => {
                if let Err(e) = self.close().await {
                    debug!("closing backend: {e}");
                }
                Ok(())
            }
            exit = rx => match exit {
                Ok(Ok(status)) if status.success() => {
                    info!("shell exited cleanly");
                    Err(Halt::Ended)
                }
                Ok(Ok(status)) => {
                    info!(code = status.code, "shell exited with error");
                    Err(BridgeError::ShellExited { code: status.code }.into())
                }
                Ok(Err(e)) => {
                    warn!("waiting for shell failed: {e}");
                    Err(e.into())
                }
                Err(_) => Err(BackendError::Closed.into()),
            }
        }
    }

    /// Stop the session and release the backend. Idempotent.
    ///
    /// Shuts stdin first, then force-closes the backend. Safe to call while
    /// [`run`](Self::run) is in progress; `run` then returns promptly.
    pub async fn close(&self) -> Result<(), BridgeError> {
        self.scope.cancel();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stdin.close().await;
        self.backend.close().await?;
        Ok(())
    }
}
