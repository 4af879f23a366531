#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! shellbridge library — bridges an interactive backend shell to a framed
//! client connection.
//!
//! - `bridge` — session orchestrator, output aggregator, input relay, health monitor
//! - `backend` / `client` — the two seams a bridge is built from
//! - `shell` — local PTY shell backend
//! - `ws` — WebSocket client connection and upgrade handler
//! - `sessions` — live session accounting
//! - `auth` — API key authentication middleware
//! - `config` — configuration loading
//! - `routes` — REST API route handlers

pub mod auth;
pub mod backend;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod routes;
pub mod sessions;
pub mod shell;
pub mod state;
pub mod ws;

use axum::{
    middleware,
    routing::{delete, get},
    Extension, Router,
};
use tower_http::trace::TraceLayer;

// Re-export key types at crate root for convenience.
pub use auth::ApiKey;
pub use backend::ShellBackend;
pub use bridge::{Bridge, BridgeOptions, BridgeState};
pub use client::ClientConnection;
pub use config::Config;
pub use state::AppState;

/// The HTTP/WS API.
///
/// | Method | Path                 | Auth | Description                    |
/// |--------|----------------------|------|--------------------------------|
/// | GET    | `/api/health`        | No   | Liveness probe                 |
/// | GET    | `/api/sessions`      | Yes  | List live sessions             |
/// | DELETE | `/api/sessions/{id}` | Yes  | Stop a session                 |
/// | GET    | `/api/ws`            | Yes* | Bridged shell over WebSocket   |
///
/// *WebSocket auth is via `?token=<key>`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(routes::health::health));

    let authed_routes = Router::new()
        .route("/api/sessions", get(routes::sessions::list_sessions))
        .route("/api/sessions/{id}", delete(routes::sessions::kill_session))
        .layer(middleware::from_fn(auth::require_api_key));

    let ws_route = Router::new().route("/api/ws", get(ws::ws_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .merge(ws_route)
        .layer(Extension(ApiKey(state.config.auth.api_key.clone())))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
