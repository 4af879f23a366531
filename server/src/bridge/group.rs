//! First-halt-cancels-all task group.
//!
//! Every bridge task resolves to `Result<(), Halt>`. The first task to halt
//! records its reason and cancels the shared scope; the others observe the
//! scope at their next suspension point and return `Ok(())`.

use std::future::Future;
use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BackendError, BridgeError, ClientError};

/// Why a task stopped the session.
#[derive(Debug)]
pub(crate) enum Halt {
    /// The session ended normally (clean shell exit, client hung up).
    ///
    /// Only exists to cancel the siblings; [`TaskGroup::finish`] turns it back
    /// into `Ok(())` so it never reaches a caller.
    Ended,
    Failed(BridgeError),
}

impl From<BridgeError> for Halt {
    fn from(err: BridgeError) -> Self {
        Halt::Failed(err)
    }
}

impl From<ClientError> for Halt {
    fn from(err: ClientError) -> Self {
        Halt::Failed(err.into())
    }
}

impl From<BackendError> for Halt {
    fn from(err: BackendError) -> Self {
        Halt::Failed(err.into())
    }
}

pub(crate) struct TaskGroup {
    scope: CancellationToken,
    first: OnceLock<Halt>,
}

impl TaskGroup {
    pub(crate) fn new(scope: CancellationToken) -> Self {
        Self {
            scope,
            first: OnceLock::new(),
        }
    }

    /// Drive `task` to completion; a halt cancels the scope.
    pub(crate) async fn run<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), Halt>>,
    {
        match task.await {
            Ok(()) => debug!(task = name, "task finished"),
            Err(halt) => {
                debug!(task = name, reason = ?halt, "task halted session");
                let _ = self.first.set(halt);
                self.scope.cancel();
            }
        }
    }

    /// Reduce the group to the caller-facing result.
    pub(crate) fn finish(self) -> Result<(), BridgeError> {
        match self.first.into_inner() {
            None | Some(Halt::Ended) => Ok(()),
            Some(Halt::Failed(err)) => Err(err),
        }
    }
}
