//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use netchat_shared::constants::{
    DEFAULT_CHAT_PORT, DEFAULT_HTTP_PORT, HEARTBEAT_TIMEOUT_SECS, STREAM_MAX_LEN,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP endpoint for chat clients.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:8888`
    pub listen_addr: SocketAddr,

    /// Socket address for the HTTP (axum) status API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database holding credentials, logs and ranks.
    /// Env: `DATABASE_PATH`
    /// Default: `./netchat.db`
    pub database_path: PathBuf,

    /// Silence allowed before an authenticated session is kicked.
    /// Env: `HEARTBEAT_TIMEOUT_SECS`
    pub heartbeat_timeout: Duration,

    /// Idle limit for a connection that has not logged in yet.
    /// Env: `LOGIN_TIMEOUT_SECS`
    pub login_timeout: Duration,

    /// Entries retained per durable stream.
    /// Env: `STREAM_MAX_LEN`
    pub stream_max_len: usize,

    /// Lifetime of cached credential lookups.
    /// Env: `CREDENTIAL_CACHE_TTL_SECS`
    pub credential_cache_ttl: Duration,

    /// Buffered events in the dispatch queue.
    /// Env: `EVENT_QUEUE_CAPACITY`
    pub event_queue_capacity: usize,

    // -- Instance settings --

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Whether new accounts can be registered.
    /// Env: `REGISTRATION_OPEN` (true/false)
    pub registration_open: bool,

    /// Maximum number of concurrent sessions (0 = unlimited).
    /// Env: `MAX_SESSIONS`
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_CHAT_PORT).into(),
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./netchat.db"),
            heartbeat_timeout: Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
            login_timeout: Duration::from_secs(120),
            stream_max_len: STREAM_MAX_LEN,
            credential_cache_ttl: Duration::from_secs(3600),
            event_queue_capacity: 100,
            instance_name: "netchat".to_string(),
            registration_open: true,
            max_sessions: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(addr) = parse_var(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "HEARTBEAT_TIMEOUT_SECS") {
            if secs > 0 {
                config.heartbeat_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("HEARTBEAT_TIMEOUT_SECS must be positive, using default");
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "LOGIN_TIMEOUT_SECS") {
            if secs > 0 {
                config.login_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!("LOGIN_TIMEOUT_SECS must be positive, using default");
            }
        }

        if let Some(len) = parse_var(&lookup, "STREAM_MAX_LEN") {
            config.stream_max_len = len;
        }

        if let Some(secs) = parse_var(&lookup, "CREDENTIAL_CACHE_TTL_SECS") {
            config.credential_cache_ttl = Duration::from_secs(secs);
        }

        if let Some(capacity) = parse_var::<usize>(&lookup, "EVENT_QUEUE_CAPACITY") {
            if capacity > 0 {
                config.event_queue_capacity = capacity;
            } else {
                tracing::warn!("EVENT_QUEUE_CAPACITY must be positive, using default");
            }
        }

        // -- Instance settings --

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("REGISTRATION_OPEN") {
            config.registration_open = parse_flag(&val);
        }

        if let Some(n) = parse_var(&lookup, "MAX_SESSIONS") {
            config.max_sessions = n;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse an env var, warning and returning `None` when it is set but invalid.
fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(value = %raw, "Invalid {}, using default", name);
            None
        }
    }
}

fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    val != "false" && val != "0"
}
