use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::Method, middleware, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use netchat_store::RankItem;

use crate::config::ServerConfig;
use crate::dispatch::DispatchHandle;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchHandle,
    pub storage: Storage,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/online", get(online_users))
        .route("/rank", get(rank_list))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    registered_users: u64,
    registration_open: bool,
    max_sessions: usize,
    uptime_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Result<Json<ServerInfoResponse>, ServerError> {
    let online = state.dispatch.online_users().await?;
    let registered = state.storage.with(|db| db.count_users())?;

    Ok(Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: online.len(),
        registered_users: registered,
        registration_open: state.config.registration_open,
        max_sessions: state.config.max_sessions,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

/// Asks the dispatch loop rather than reading the registry directly.
async fn online_users(State(state): State<AppState>) -> Result<Json<Vec<String>>, ServerError> {
    Ok(Json(state.dispatch.online_users().await?))
}

async fn rank_list(State(state): State<AppState>) -> Result<Json<Vec<RankItem>>, ServerError> {
    Ok(Json(state.storage.with(|db| db.rank_descending())?))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::sync::watch;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::dispatch::{spawn_dispatcher, DispatchSettings, Dispatcher};
    use crate::log_store::LogStore;
    use crate::outbox::Outbox;
    use crate::registry::SessionHandle;

    fn state() -> AppState {
        let storage = Storage::in_memory().unwrap();
        let dispatcher = Dispatcher::new(
            LogStore::new(storage.clone(), 100),
            storage.clone(),
            DispatchSettings {
                heartbeat_timeout: Duration::from_secs(50),
                max_sessions: 0,
            },
        );
        let (dispatch, _task) = spawn_dispatcher(dispatcher, 8);
        AppState {
            dispatch,
            storage,
            rate_limiter: RateLimiter::for_http(),
            config: Arc::new(ServerConfig::default()),
            started_at: Instant::now(),
        }
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(state(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_online_and_info_go_through_dispatch() {
        let state = state();
        state
            .storage
            .with(|db| db.insert_user("alice", "salt$digest"))
            .unwrap();
        let (outbox, _rx) = Outbox::channel(8);
        let (deadline, _) = watch::channel(tokio::time::Instant::now());
        state
            .dispatch
            .join(SessionHandle::new("alice", Uuid::new_v4(), outbox, deadline))
            .await
            .unwrap();

        let (status, body) = get_json(state.clone(), "/online").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!(["alice"]));

        let (_, info) = get_json(state, "/info").await;
        assert_eq!(info["online_users"], 1);
        assert_eq!(info["registered_users"], 1);
        assert_eq!(info["name"], "netchat");
    }

    #[tokio::test]
    async fn test_rank_is_descending() {
        let state = state();
        state
            .storage
            .with(|db| {
                db.increment_rank("bob")?;
                db.increment_rank("alice")?;
                db.increment_rank("alice")
            })
            .unwrap();

        let (_, body) = get_json(state, "/rank").await;
        assert_eq!(body[0]["member"], "alice");
        assert_eq!(body[0]["score"], 2.0);
        assert_eq!(body[1]["member"], "bob");
    }
}
