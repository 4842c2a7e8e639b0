//! Chat listener and the wiring shared by every connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::cache::CredentialCache;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::dispatch::{spawn_dispatcher, DispatchHandle, DispatchSettings, Dispatcher};
use crate::log_store::LogStore;
use crate::rate_limit::RateLimiter;
use crate::storage::Storage;

/// Handles every connection task needs.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub logs: LogStore,
    pub dispatch: DispatchHandle,
    pub auth: Authenticator,
    pub auth_limiter: RateLimiter,
}

impl ServerContext {
    /// Build the subsystems on top of `storage` and start the dispatch loop.
    pub fn start(
        config: Arc<ServerConfig>,
        storage: Storage,
        cache: CredentialCache,
        auth_limiter: RateLimiter,
    ) -> (Self, JoinHandle<()>) {
        let logs = LogStore::new(storage.clone(), config.stream_max_len);
        let dispatcher = Dispatcher::new(
            logs.clone(),
            storage.clone(),
            DispatchSettings {
                heartbeat_timeout: config.heartbeat_timeout,
                max_sessions: config.max_sessions,
            },
        );
        let (dispatch, task) = spawn_dispatcher(dispatcher, config.event_queue_capacity);
        let auth = Authenticator::new(storage, cache, config.registration_open);

        let ctx = Self {
            config,
            logs,
            dispatch,
            auth,
            auth_limiter,
        };
        (ctx, task)
    }
}

pub struct ChatServer {
    listener: TcpListener,
    ctx: ServerContext,
}

impl ChatServer {
    pub async fn bind(ctx: ServerContext) -> std::io::Result<Self> {
        let listener = TcpListener::bind(ctx.config.listen_addr).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task each.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "Chat server listening");
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
                    }
                    tokio::spawn(handle_connection(stream, peer, self.ctx.clone()));
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}
