//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `SHELLBRIDGE_API_KEY`, `SHELLBRIDGE_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `shellbridge.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:1337"
//! max_sessions = 20
//! default_terminal_cols = 80
//! default_terminal_rows = 24
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [shell]
//! default_shell = "/bin/sh"
//! default_working_dir = "/"
//!
//! [bridge]
//! flush_interval_ms = 60
//! keepalive_interval_secs = 15
//! keepalive_max_failures = 3
//! drain_timeout_ms = 500
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "shellbridge.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:1337`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent bridged sessions (default 20).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Terminal rows when the client doesn't send any (default 24).
    #[serde(default = "default_terminal_rows")]
    pub default_terminal_rows: u16,
    /// Terminal columns when the client doesn't send any (default 80).
    #[serde(default = "default_terminal_cols")]
    pub default_terminal_cols: u16,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared key. Override with `SHELLBRIDGE_API_KEY` env var.
    /// Defaults to `"change-me"` which triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Shell defaults used when the client doesn't specify overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary for sessions (default `/bin/sh`).
    #[serde(default = "default_shell")]
    pub default_shell: String,
    /// Working directory for sessions (default `/`).
    #[serde(default = "default_working_dir")]
    pub default_working_dir: String,
}

/// Per-session bridge timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Output flush period in milliseconds (default 60).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Seconds between liveness probes (default 15).
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// Consecutive probe failures before the session is declared dead (default 3).
    #[serde(default = "default_keepalive_max_failures")]
    pub keepalive_max_failures: u32,
    /// Bound on the final flush and client close at session end, in
    /// milliseconds (default 500).
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:1337".to_string()
}
fn default_max_sessions() -> usize {
    20
}
fn default_terminal_rows() -> u16 {
    24
}
fn default_terminal_cols() -> u16 {
    80
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_working_dir() -> String {
    "/".to_string()
}
fn default_flush_interval_ms() -> u64 {
    60
}
fn default_keepalive_interval_secs() -> u64 {
    15
}
fn default_keepalive_max_failures() -> u32 {
    3
}
fn default_drain_timeout_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_sessions: default_max_sessions(),
            default_terminal_rows: default_terminal_rows(),
            default_terminal_cols: default_terminal_cols(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            default_working_dir: default_working_dir(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            keepalive_max_failures: default_keepalive_max_failures(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise
    /// `shellbridge.toml` in the current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;
        for (name, value) in [
            ("bridge.flush_interval_ms", bridge.flush_interval_ms),
            ("bridge.keepalive_interval_secs", bridge.keepalive_interval_secs),
            ("bridge.drain_timeout_ms", bridge.drain_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("SHELLBRIDGE_API_KEY") {
            self.auth.api_key = key;
        }
        if let Some(listen) = var("SHELLBRIDGE_LISTEN") {
            self.server.listen = listen;
        }
    }
}
