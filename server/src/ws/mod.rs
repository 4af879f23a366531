//! WebSocket transport for bridged shell sessions.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /api/ws?token=<api_key>[&cols=&rows=&shell=&working_dir=]`.
//!    The token is validated and a session slot reserved before the upgrade
//!    completes.
//! 2. A login shell is started on a local PTY and bridged to the socket.
//! 3. The session ends when the shell exits, the client goes away, the
//!    shell stops answering probes, the session is killed over REST, or the
//!    server shuts down.
//!
//! ## Frames
//!
//! | Direction        | Kind   | Content                                           |
//! |------------------|--------|---------------------------------------------------|
//! | client → server  | text   | `{"type":"resize","cols":C,"rows":R}`             |
//! | client → server  | text   | `{"type":"cmd","cmd":"<base64 stdin bytes>"}`     |
//! | client → server  | text   | `{"type":"heartbeat"}`                            |
//! | client → server  | binary | raw stdin bytes                                   |
//! | server → client  | binary | terminal output, coalesced every flush interval   |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn};

use crate::auth::ApiKey;
use crate::backend::TermSize;
use crate::bridge::{Bridge, BridgeOptions};
use crate::client::{ClientConnection, Inbound};
use crate::config::Config;
use crate::error::ClientError;
use crate::sessions::{SessionSlot, SessionSpec};
use crate::shell::local::LocalShell;
use crate::shell::resolve_shell;
use crate::AppState;

/// Query parameters for the WebSocket upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// API key passed as a query parameter (since HTTP headers aren't available
    /// during a browser WebSocket upgrade).
    pub token: String,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub shell: Option<String>,
    pub working_dir: Option<String>,
}

/// Terminal size for a new session; zero or missing dimensions fall back to
/// the configured defaults.
fn initial_size(query: &WsQuery, config: &Config) -> TermSize {
    TermSize::new(
        query
            .cols
            .filter(|c| *c > 0)
            .unwrap_or(config.server.default_terminal_cols),
        query
            .rows
            .filter(|r| *r > 0)
            .unwrap_or(config.server.default_terminal_rows),
    )
}

/// `GET /api/ws?token=<key>` — WebSocket upgrade handler.
///
/// # Error responses
///
/// - `403 Forbidden` — bad token
/// - `503 Service Unavailable` — `max_sessions` already running
/// - `500 Internal Server Error` — no usable shell on this host
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !ApiKey(state.config.auth.api_key.clone()).matches(&query.token) {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    let requested = query
        .shell
        .clone()
        .unwrap_or_else(|| state.config.shell.default_shell.clone());
    let Some(shell) = resolve_shell(&requested) else {
        error!(shell = %requested, "no usable shell found");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "No shell available"})),
        )
            .into_response();
    };
    if shell != requested {
        warn!(requested = %requested, using = %shell, "requested shell not found");
    }

    let launch = Launch {
        shell,
        working_dir: query
            .working_dir
            .clone()
            .unwrap_or_else(|| state.config.shell.default_working_dir.clone()),
        size: initial_size(&query, &state.config),
    };
    let slot = match state.sessions.reserve(launch.spec(), &state.shutdown) {
        Ok(slot) => slot,
        Err(e) => {
            warn!("rejecting session: {e}");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| run_session(socket, state, slot, launch))
}

/// What to start once the socket is up.
struct Launch {
    shell: String,
    working_dir: String,
    size: TermSize,
}

impl Launch {
    fn spec(&self) -> SessionSpec {
        SessionSpec {
            shell: self.shell.clone(),
            working_dir: self.working_dir.clone(),
            size: self.size,
        }
    }
}

async fn run_session(socket: WebSocket, state: AppState, slot: SessionSlot, launch: Launch) {
    let span = info_span!("session", id = %slot.id());
    let env = HashMap::from([("SHELLBRIDGE_SESSION".to_string(), slot.id().to_string())]);
    let backend = Arc::new(LocalShell::new(launch.shell, launch.working_dir, env));
    let options = BridgeOptions::from(&state.config.bridge);

    let bridge = match Bridge::new(
        backend,
        WsConnection::new(socket),
        launch.size,
        options,
        span.clone(),
    )
    .await
    {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(parent: &span, error = %e, "session setup failed");
            return;
        }
    };
    slot.attach_state(bridge.subscribe());
    info!(parent: &span, cols = launch.size.cols, rows = launch.size.rows, "session started");

    match bridge.run(slot.stop_token()).await {
        Ok(()) => info!(parent: &span, bytes_out = bridge.bytes_out(), "session ended"),
        Err(e) => warn!(parent: &span, error = %e, "session ended with error"),
    }
}

/// [`ClientConnection`] over an axum WebSocket.
///
/// Reads and writes use separate halves so the input relay and the flush
/// loop never contend for one lock.
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl ClientConnection for WsConnection {
    async fn read_frame(&self) -> Result<Option<Inbound>, ClientError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(Inbound::Text(text.as_str().to_owned()))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Inbound::Binary(data.to_vec()))),
                // Pings are answered by axum.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            }
        }
    }

    async fn write_frame(&self, data: Vec<u8>) -> Result<(), ClientError> {
        self.sink
            .lock()
            .await
            .send(Message::Binary(data.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}
