//! Client → shell direction.
//!
//! Reads one frame at a time and applies it: resize the PTY, write decoded
//! bytes to stdin, or nothing for heartbeats. Per-frame problems (bad JSON,
//! bad base64, a failed stdin write) are logged and skipped; only a failed
//! read ends the session.

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{self, Control};
use super::group::Halt;
use crate::backend::{ShellBackend, StdinWriter};
use crate::client::{ClientConnection, Inbound};
use crate::error::BackendError;

/// Owner of the shell's stdin writer.
///
/// The writer is taken exactly once by [`StdinSlot::close`]; writes after
/// that fail with [`BackendError::Closed`].
pub(crate) struct StdinSlot {
    writer: Mutex<Option<StdinWriter>>,
}

impl StdinSlot {
    pub(crate) fn new(writer: StdinWriter) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
        }
    }

    pub(crate) async fn write(&self, data: &[u8]) -> Result<(), BackendError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(BackendError::Closed)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut the writer down. Returns `false` if it was already closed.
    pub(crate) async fn close(&self) -> bool {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return false;
        };
        if let Err(e) = writer.shutdown().await {
            debug!("stdin shutdown: {e}");
        }
        true
    }
}

/// Relay client frames into the backend until `stop` fires or the read fails.
pub(crate) async fn relay_input<B, C>(
    client: &C,
    backend: &B,
    stdin: &StdinSlot,
    stop: &CancellationToken,
) -> Result<(), Halt>
where
    B: ShellBackend + ?Sized,
    C: ClientConnection + ?Sized,
{
    loop {
        let inbound = tokio::select! {
            () = stop.cancelled() => return Ok(()),
            inbound = client.read_frame() => inbound,
        };

        let control = match inbound {
            Ok(Some(Inbound::Text(text))) => match frame::decode(&text) {
                Ok(control) => control,
                Err(e) => {
                    warn!("ignoring inbound frame: {e}");
                    continue;
                }
            },
            Ok(Some(Inbound::Binary(data))) => Control::Input(data),
            Ok(None) => {
                info!("client closed the connection");
                return Err(Halt::Ended);
            }
            Err(e) => {
                warn!("client read failed: {e}");
                return Err(e.into());
            }
        };

        // A stdin write can block if the shell stops reading; stay interruptible.
        tokio::select! {
            () = stop.cancelled() => return Ok(()),
            () = apply(backend, stdin, control) => {}
        }
    }
}

async fn apply<B>(backend: &B, stdin: &StdinSlot, control: Control)
where
    B: ShellBackend + ?Sized,
{
    match control {
        Control::Resize(size) => {
            if let Err(e) = backend.resize(size).await {
                warn!(cols = size.cols, rows = size.rows, "resize failed: {e}");
            }
        }
        Control::Input(data) => {
            if let Err(e) = stdin.write(&data).await {
                warn!(bytes = data.len(), "stdin write failed: {e}");
            }
        }
        Control::Heartbeat => {}
        Control::Unknown(kind) => debug!(kind = %kind, "ignoring unknown frame type"),
    }
}
