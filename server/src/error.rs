//! Error types shared by the bridge, its backends and its client transports.
//!
//! The bridge distinguishes four classes of failure:
//!
//! - **Client** errors ([`ClientError`]) — the duplex connection to the
//!   browser/CLI is gone. Always fatal to the session.
//! - **Backend** errors ([`BackendError`]) — a single PTY, stdin or probe
//!   operation failed. Fatal only during construction or when they come out of
//!   the exit watcher; otherwise logged.
//! - **Shell exit** — the remote shell terminated with a non-zero status.
//! - **Unresponsive** — the health monitor gave up after too many consecutive
//!   probe failures.

use thiserror::Error;

/// Failures reported by a [`crate::backend::ShellBackend`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// Pseudo-terminal allocation or configuration failed.
    #[error("pty request failed: {0}")]
    Pty(String),

    /// The shell process could not be started.
    #[error("failed to start shell: {0}")]
    Spawn(String),

    /// An I/O operation against the backend failed.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation that needs a running shell was issued before `start_shell`.
    #[error("shell has not been started")]
    NotStarted,

    /// The stdin handle was already handed out.
    #[error("stdin has already been taken")]
    StdinTaken,

    /// The backend has been force-closed.
    #[error("backend is closed")]
    Closed,

    /// A liveness probe could not be delivered.
    #[error("liveness probe failed: {0}")]
    Probe(String),
}

/// Failures reported by a [`crate::client::ClientConnection`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying transport failed while reading or writing.
    #[error("client transport error: {0}")]
    Transport(String),

    /// The connection has already been closed locally.
    #[error("client connection is closed")]
    Closed,
}

/// The single error a [`crate::bridge::Bridge`] surfaces to its caller.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The shell terminated with a non-zero exit status.
    #[error("shell exited with status {code}")]
    ShellExited { code: i32 },

    /// Consecutive liveness probes failed past the configured threshold.
    #[error("session appears dead: {0}")]
    Unresponsive(#[source] BackendError),

    /// `run` was invoked more than once on the same bridge.
    #[error("bridge has already been run")]
    AlreadyRun,
}
