use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use revu_core::ids::SessionId;
use revu_core::state::ConnectionState;

use crate::broadcaster::Broadcaster;
use crate::wire;

/// HTTP listener configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind. `0` picks a free port.
    pub port: u16,
    /// Interval between keep-alive comments on idle event streams.
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4680,
            keep_alive_secs: 15,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub keep_alive: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(broadcaster: Broadcaster, keep_alive: Duration) -> Self {
        Self {
            broadcaster,
            keep_alive,
            started_at: Instant::now(),
        }
    }
}

/// Snapshot returned by `GET /api/events/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: ConnectionState,
    pub subscribers: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/events/status", get(status_handler))
        .route("/api/sessions/{session_id}/events", get(events_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. The server stops accepting connections once `shutdown`
/// is cancelled and exits after open streams have ended.
pub async fn start(
    config: &ServerConfig,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(broadcaster, Duration::from_secs(config.keep_alive_secs.max(1)));
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "revu server started");

    let handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        handle,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn into_join_handle(self) -> tokio::task::JoinHandle<()> {
        self.handle
    }
}

/// Live event stream for one session.
async fn events_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.broadcaster.subscribe(SessionId::from_raw(session_id)) {
        Ok(subscription) => wire::sse_response(subscription, state.keep_alive).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.broadcaster.state(),
        subscribers: state.broadcaster.subscriber_count(),
    })
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}
