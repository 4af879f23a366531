#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # shellbridge
//!
//! Serves interactive shells on this host over WebSocket.
//!
//! Each `GET /api/ws` connection gets a login shell on its own PTY. Client
//! text frames carry resize, stdin and heartbeat messages; terminal output
//! goes back as binary frames, coalesced on a short flush interval. See
//! [`shellbridge::router`] for the full API surface.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, graceful shutdown
//! lib.rs           — router
//! auth.rs          — Bearer token middleware, constant-time comparison
//! config.rs        — TOML + env-var configuration
//! error.rs         — backend / client / bridge error types
//! backend.rs       — ShellBackend trait
//! client.rs        — ClientConnection trait
//! bridge/
//!   mod.rs         — Bridge: task group, drain-then-close, teardown
//!   aggregator.rs  — output buffer + periodic flush
//!   input.rs       — client frame relay
//!   health.rs      — liveness probing
//!   frame.rs       — JSON control frames
//! shell/
//!   pty.rs         — PTY allocation, spawn, resize
//!   local.rs       — LocalShell backend
//! sessions/        — live session registry
//! routes/          — /api/health, /api/sessions
//! ws/              — WebSocket upgrade and ClientConnection
//! ```

use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use shellbridge::config::Config;
use shellbridge::AppState;

/// How long shutdown waits for bridged sessions to drain.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves interactive shells over WebSocket.
#[derive(Parser)]
#[command(name = "shellbridge", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to TOML config file (when no subcommand is given).
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve,
    /// Print the effective configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shellbridge: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Commands::CheckConfig) => {
            println!("{config:#?}");
            std::process::ExitCode::SUCCESS
        }
        Some(Commands::Serve) | None => match run_server(config).await {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                error!("server error: {e}");
                std::process::ExitCode::FAILURE
            }
        },
    }
}

async fn run_server(config: Config) -> std::io::Result<()> {
    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("shellbridge v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    if config.auth.api_key == "change-me" {
        warn!("Using default API key — set SHELLBRIDGE_API_KEY or update config");
    }

    let state = AppState::new(config);
    let app = shellbridge::router(state.clone());
    let listener = TcpListener::bind(&state.config.server.listen).await?;

    info!("Server ready");

    let stop = state.shutdown.clone();
    let shutdown = async move {
        shutdown_signal().await;
        // Upgraded sockets outlive the HTTP server; stop their bridges too.
        stop.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Shutting down...");
    drain_sessions(&state).await;
    info!("Goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}

/// Wait for every bridge to flush and close its client.
async fn drain_sessions(state: &AppState) {
    let deadline = tokio::time::Instant::now() + SESSION_DRAIN_TIMEOUT;
    loop {
        let remaining = state.sessions.count();
        if remaining == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(remaining, "sessions still open at shutdown");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
