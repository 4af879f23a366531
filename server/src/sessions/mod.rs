//! Accounting for live bridged sessions.
//!
//! [`SessionRegistry`] enforces `max_sessions` and lets the REST API list and
//! kill sessions. It owns no I/O: each entry holds the session's stop token
//! (a child of the server shutdown token) and a view of its bridge state.
//!
//! A slot is taken with [`SessionRegistry::reserve`] before the WebSocket
//! upgrade completes and given back when the returned [`SessionSlot`] drops,
//! so every exit path of a session handler frees it.
//!
//! ## Concurrency
//!
//! The map is behind a std `RwLock` that is never held across an await.
//! `reserve` holds the write lock across the limit check and insert.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::backend::TermSize;
use crate::bridge::BridgeState;

/// Cloneable — all clones share the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    max_sessions: usize,
}

struct SessionEntry {
    shell: String,
    working_dir: String,
    size: TermSize,
    created_at: u64,
    stop: CancellationToken,
    state: Option<watch::Receiver<BridgeState>>,
}

/// Summary of a session returned by [`SessionRegistry::list`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionListItem {
    pub session_id: String,
    pub shell: String,
    pub working_dir: String,
    pub cols: u16,
    pub rows: u16,
    /// Bridge lifecycle state; `"starting"` until the bridge exists.
    pub state: &'static str,
    /// Unix seconds.
    pub created_at: u64,
}

/// What a new session will run, recorded at reservation time.
pub struct SessionSpec {
    pub shell: String,
    pub working_dir: String,
    pub size: TermSize,
}

#[derive(Debug, thiserror::Error)]
#[error("session limit reached (max {max})")]
pub struct SessionLimit {
    pub max: usize,
}

/// A reserved registry slot. Dropping it removes the session.
pub struct SessionSlot {
    id: String,
    stop: CancellationToken,
    registry: SessionRegistry,
}

impl SessionSlot {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop token for this session's bridge.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Expose the bridge's state to listings.
    pub fn attach_state(&self, state: watch::Receiver<BridgeState>) {
        let mut sessions = self.registry.write();
        if let Some(entry) = sessions.get_mut(&self.id) {
            entry.state = Some(state);
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if self.registry.write().remove(&self.id).is_some() {
            info!(session_id = %self.id, "session released");
        }
    }
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Take a slot for a new session whose stop token derives from `shutdown`.
    pub fn reserve(
        &self,
        spec: SessionSpec,
        shutdown: &CancellationToken,
    ) -> Result<SessionSlot, SessionLimit> {
        let mut sessions = self.write();
        if sessions.len() >= self.max_sessions {
            return Err(SessionLimit {
                max: self.max_sessions,
            });
        }

        let id = Uuid::new_v4().to_string();
        let stop = shutdown.child_token();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        sessions.insert(
            id.clone(),
            SessionEntry {
                shell: spec.shell,
                working_dir: spec.working_dir,
                size: spec.size,
                created_at,
                stop: stop.clone(),
                state: None,
            },
        );
        drop(sessions);

        Ok(SessionSlot {
            id,
            stop,
            registry: self.clone(),
        })
    }

    /// Count of live sessions.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// All live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionListItem> {
        let mut items: Vec<SessionListItem> = self
            .read()
            .iter()
            .map(|(id, entry)| SessionListItem {
                session_id: id.clone(),
                shell: entry.shell.clone(),
                working_dir: entry.working_dir.clone(),
                cols: entry.size.cols,
                rows: entry.size.rows,
                state: entry
                    .state
                    .as_ref()
                    .map_or("starting", |rx| rx.borrow().as_str()),
                created_at: entry.created_at,
            })
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    /// Ask a session's bridge to stop. Returns false if no such session.
    ///
    /// The entry stays listed until the session handler drops its slot.
    pub fn kill(&self, session_id: &str) -> bool {
        match self.read().get(session_id) {
            Some(entry) => {
                entry.stop.cancel();
                info!(session_id, "session stop requested");
                true
            }
            None => false,
        }
    }
}
