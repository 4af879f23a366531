//! The backend side of a bridge: an established, PTY-backed shell session.
//!
//! In production the backend is an SSH session reached through the hub's
//! reverse tunnel; locally it is a shell on a host PTY
//! ([`crate::shell::local::LocalShell`]). The bridge only depends on this
//! trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::bridge::aggregator::OutputAggregator;
use crate::error::BackendError;

/// Write end of the backend shell's stdin.
pub type StdinWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// How the backend shell terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellExit {
    /// Exit status, or `-1` when the shell was killed by a signal.
    pub code: i32,
}

impl ShellExit {
    pub fn success(self) -> bool {
        self.code == 0
    }
}

/// A remote (or local) shell session the bridge can drive.
///
/// Construction order used by the bridge: [`request_pty`](Self::request_pty),
/// [`take_stdin`](Self::take_stdin), [`attach_output`](Self::attach_output),
/// [`start_shell`](Self::start_shell).
///
/// Implementations must tolerate [`wait`](Self::wait) running concurrently
/// with [`resize`](Self::resize), [`probe`](Self::probe) and
/// [`close`](Self::close).
#[async_trait]
pub trait ShellBackend: Send + Sync + 'static {
    /// Allocate a pseudo-terminal with the initial geometry.
    async fn request_pty(&self, size: TermSize) -> Result<(), BackendError>;

    /// Hand out the stdin writer. Only the first call succeeds.
    fn take_stdin(&self) -> Result<StdinWriter, BackendError>;

    /// Route combined stdout+stderr into `sink`.
    fn attach_output(&self, sink: Arc<OutputAggregator>);

    /// Start the interactive shell.
    async fn start_shell(&self) -> Result<(), BackendError>;

    /// Report a window-size change to the pseudo-terminal.
    async fn resize(&self, size: TermSize) -> Result<(), BackendError>;

    /// Send a liveness probe that does not wait for a reply.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Wait for the shell to terminate.
    ///
    /// Must only resolve after every byte the shell produced has been written
    /// to the output sink.
    async fn wait(&self) -> Result<ShellExit, BackendError>;

    /// Force-close the session. Idempotent.
    async fn close(&self) -> Result<(), BackendError>;
}
