//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::sessions::SessionRegistry;

/// Shared application state for the shellbridge server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Live bridged sessions.
    pub sessions: SessionRegistry,
    /// Cancelled on server shutdown; every session's stop token is a child.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sessions = SessionRegistry::new(config.server.max_sessions);
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            sessions,
            shutdown: CancellationToken::new(),
        }
    }
}
