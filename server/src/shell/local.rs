//! [`ShellBackend`] backed by a login shell on a local PTY.
//!
//! Used when the hub serves a shell on its own host, and as the reference
//! backend in tests. Output is read from a duplicate of the PTY master and
//! pushed into the bridge's [`OutputAggregator`]; stdin is another duplicate.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::pty::{self, PtyPair};
use crate::backend::{ShellBackend, ShellExit, StdinWriter, TermSize};
use crate::bridge::aggregator::OutputAggregator;
use crate::error::BackendError;

/// How long `wait` keeps draining PTY output after the shell has exited.
///
/// Background jobs that inherited the terminal can hold the slave open
/// indefinitely; past this bound their output is abandoned.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A shell process running on a PTY owned by this host.
pub struct LocalShell {
    shell: String,
    working_dir: String,
    env: HashMap<String, String>,
    pair: StdMutex<Option<PtyPair>>,
    master: StdMutex<Option<OwnedFd>>,
    stdin: StdMutex<Option<tokio::fs::File>>,
    output: StdMutex<Option<Arc<OutputAggregator>>>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    pid: AtomicI32,
    closed: AtomicBool,
}

impl LocalShell {
    pub fn new(
        shell: impl Into<String>,
        working_dir: impl Into<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            shell: shell.into(),
            working_dir: working_dir.into(),
            env,
            pair: StdMutex::new(None),
            master: StdMutex::new(None),
            stdin: StdMutex::new(None),
            output: StdMutex::new(None),
            child: Mutex::new(None),
            reader: Mutex::new(None),
            pid: AtomicI32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// OS pid of the shell, once started.
    pub fn pid(&self) -> Option<i32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn spawn_reader(&self, mut master: tokio::fs::File, pid: i32) -> JoinHandle<()> {
        let sink = lock(&self.output).clone();
        tokio::spawn(async move {
            let mut tmp = [0u8; 4096];
            loop {
                // EIO once every slave fd is closed, i.e. the shell is gone.
                match master.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Some(ref sink) = sink {
                            sink.write(&tmp[..n]).await;
                        }
                    }
                }
            }
            debug!(pid, "pty output closed");
        })
    }
}

#[async_trait]
impl ShellBackend for LocalShell {
    async fn request_pty(&self, size: TermSize) -> Result<(), BackendError> {
        let pair = pty::allocate_pty(size).map_err(|e| BackendError::Pty(e.to_string()))?;
        let writer = pty::clone_master(&pair.master)?;
        *lock(&self.stdin) = Some(writer);
        *lock(&self.pair) = Some(pair);
        Ok(())
    }

    fn take_stdin(&self) -> Result<StdinWriter, BackendError> {
        let writer = lock(&self.stdin).take().ok_or(BackendError::StdinTaken)?;
        Ok(Box::new(writer))
    }

    fn attach_output(&self, sink: Arc<OutputAggregator>) {
        *lock(&self.output) = Some(sink);
    }

    async fn start_shell(&self) -> Result<(), BackendError> {
        let PtyPair { master, slave } = lock(&self.pair).take().ok_or(BackendError::NotStarted)?;

        let child = pty::spawn_shell_pty(&slave, &self.shell, &self.working_dir, &self.env)
            .map_err(|e| BackendError::Spawn(format!("{}: {e}", self.shell)))?;
        // The child holds its own copy; keeping ours would hide EOF from the reader.
        drop(slave);

        #[allow(clippy::cast_possible_wrap)]
        let pid = child.id().map_or(0, |id| id as i32);
        self.pid.store(pid, Ordering::SeqCst);
        info!(pid, shell = %self.shell, "shell started on pty");

        let reader = pty::clone_master(&master)?;
        *self.reader.lock().await = Some(self.spawn_reader(reader, pid));
        *self.child.lock().await = Some(child);
        *lock(&self.master) = Some(master);
        Ok(())
    }

    async fn resize(&self, size: TermSize) -> Result<(), BackendError> {
        let master = lock(&self.master);
        let master = master.as_ref().ok_or(BackendError::NotStarted)?;
        pty::resize_pty(master, size).map_err(|e| BackendError::Pty(e.to_string()))
    }

    /// Signal 0: checks the process still exists without touching it.
    async fn probe(&self) -> Result<(), BackendError> {
        let pid = self.pid().ok_or(BackendError::NotStarted)?;
        signal::kill(Pid::from_raw(pid), None::<Signal>).map_err(|e| BackendError::Probe(e.to_string()))
    }

    async fn wait(&self) -> Result<ShellExit, BackendError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Err(BackendError::NotStarted);
        };
        let status = child.wait().await?;
        let code = status.code().unwrap_or(-1);
        info!(pid = self.pid.load(Ordering::SeqCst), code, "shell exited");

        let reader = self.reader.lock().await.take();
        if let Some(reader) = reader {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                debug!("pty output still open after shell exit, abandoning it");
            }
        }
        Ok(ShellExit { code })
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.stdin).take();
        if let Some(pid) = self.pid() {
            match signal::killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => return Err(BackendError::Io(e.into())),
            }
        }
        lock(&self.master).take();
        Ok(())
    }
}
