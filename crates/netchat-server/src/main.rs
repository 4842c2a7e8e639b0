//! # netchat-server
//!
//! Multi-user chat server.
//!
//! This binary provides:
//! - **Chat endpoint** (TCP, length-prefixed JSON envelopes) with
//!   registration, login, public and private messages, history and a
//!   leaderboard
//! - **Dispatch loop** that owns the session registry and serializes every
//!   state change
//! - **Durable per-stream logs** in SQLite with consumer groups, tailed by
//!   one inbox worker and one broadcast worker per session
//! - **Heartbeat timeouts** that kick silent sessions
//! - **REST API** (axum) for health checks, online users and ranks
//! - **Per-IP rate limiting** of login attempts and API requests

mod api;
mod auth;
mod cache;
mod config;
mod connection;
mod dispatch;
mod error;
mod log_store;
mod notice;
mod outbox;
mod rate_limit;
mod registry;
mod server;
mod storage;
mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::cache::CredentialCache;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::server::{ChatServer, ServerContext};
use crate::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,netchat_server=debug")),
        )
        .init();

    info!("Starting netchat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = Arc::new(ServerConfig::from_env());
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        registration_open = config.registration_open,
        max_sessions = config.max_sessions,
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Database (creates the file and runs migrations if needed)
    let storage = Storage::open(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let credential_cache = CredentialCache::new(config.credential_cache_ttl);
    let auth_limiter = RateLimiter::for_auth_attempts();
    let http_limiter = RateLimiter::for_http();

    // Dispatch loop, owner of the session registry
    let (ctx, dispatcher) = ServerContext::start(
        config.clone(),
        storage.clone(),
        credential_cache.clone(),
        auth_limiter.clone(),
    );

    let app_state = AppState {
        dispatch: ctx.dispatch.clone(),
        storage,
        rate_limiter: http_limiter.clone(),
        config: config.clone(),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            auth_limiter.purge_stale(Duration::from_secs(600)).await;
            http_limiter.purge_stale(Duration::from_secs(600)).await;
        }
    });

    // Credential cache cleanup (every 10 minutes)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            credential_cache.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the chat listener and the HTTP API until shutdown
    // -----------------------------------------------------------------------
    let chat_server = ChatServer::bind(ctx).await?;
    let http_addr = config.http_addr;

    tokio::select! {
        result = chat_server.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Chat server failed");
                return Err(e);
            }
        }
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = dispatcher => {
            anyhow::bail!("Dispatch loop exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
