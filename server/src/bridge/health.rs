//! Out-of-band liveness checking of the backend.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::group::Halt;
use crate::backend::ShellBackend;
use crate::error::BridgeError;

/// Probe the backend every `interval`; give up after `max_failures` in a row.
///
/// A single success resets the count, so short network blips never kill an
/// interactive session.
pub(crate) async fn monitor<B>(
    backend: &B,
    interval: Duration,
    max_failures: u32,
    stop: &CancellationToken,
) -> Result<(), Halt>
where
    B: ShellBackend + ?Sized,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            () = stop.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let probe = tokio::select! {
            () = stop.cancelled() => return Ok(()),
            probe = backend.probe() => probe,
        };

        match probe {
            Ok(()) => {
                if failures > 0 {
                    info!(failures, "backend responding again");
                }
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                warn!(failures, max_failures, "liveness probe failed: {e}");
                if failures >= max_failures.max(1) {
                    error!(failures, "session appears dead");
                    return Err(BridgeError::Unresponsive(e).into());
                }
            }
        }
    }
}
