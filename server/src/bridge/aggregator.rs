//! Coalescing output buffer between the shell and the client.
//!
//! The backend appends raw bytes with [`OutputAggregator::write`]; the flush
//! loop drains them every `flush_interval` into a single binary frame. The
//! lock is held only to append or to capture-and-clear, never across the
//! client write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::client::ClientConnection;
use crate::error::ClientError;

/// Mutex-guarded byte buffer fed by the backend and drained by the flusher.
#[derive(Debug, Default)]
pub struct OutputAggregator {
    buf: Mutex<Vec<u8>>,
    total: AtomicU64,
}

impl OutputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append shell output.
    pub async fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.buf.lock().await.extend_from_slice(data);
        self.total.fetch_add(data.len() as u64, Ordering::Relaxed);
    }

    /// Capture the buffered bytes and leave the buffer empty.
    pub async fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock().await)
    }

    /// Bytes currently waiting for the next flush.
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.buf.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.buf.lock().await.is_empty()
    }

    /// Bytes ever written by the backend.
    pub fn total_written(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Send everything buffered so far as one frame. Returns the frame size.
    pub async fn flush<C>(&self, client: &C) -> Result<usize, ClientError>
    where
        C: ClientConnection + ?Sized,
    {
        let data = self.take().await;
        if data.is_empty() {
            return Ok(0);
        }
        let n = data.len();
        client.write_frame(data).await?;
        trace!(bytes = n, "flushed output");
        Ok(n)
    }

    /// Flush every `period` until `stop` fires, then flush one final time.
    ///
    /// The final flush is what guarantees the client sees the shell's last
    /// output. A write failure ends the loop immediately.
    pub async fn run_flush_loop<C>(
        &self,
        client: &C,
        period: Duration,
        stop: &CancellationToken,
    ) -> Result<(), ClientError>
    where
        C: ClientConnection + ?Sized,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush(client).await?;
                }
            }
        }
        self.flush(client).await?;
        Ok(())
    }
}
