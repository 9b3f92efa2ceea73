//! `CometServer` — Axum HTTP + WebSocket gateway.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use comet_core::Registry;
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::{info, instrument, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_ACTIVE;
use crate::poll::{run_long_poll, ReconnectQuery};
use crate::shutdown::ShutdownCoordinator;
use crate::ws::run_ws_session;

/// Generates UUIDv7 request IDs.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id)
            .ok()
            .map(RequestId::new)
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry.
    pub registry: Arc<Registry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: ServerConfig,
    /// Prometheus metrics handle for rendering.
    pub metrics_handle: Arc<PrometheusHandle>,
    /// Open WebSocket connections.
    pub ws_connections: Arc<AtomicUsize>,
}

/// The comet gateway server.
pub struct CometServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics_handle: Arc<PrometheusHandle>,
    ws_connections: Arc<AtomicUsize>,
    start_time: Instant,
}

impl CometServer {
    /// Create a new server over a fresh registry.
    #[must_use]
    pub fn new(config: ServerConfig, metrics_handle: PrometheusHandle) -> Self {
        let registry = Arc::new(Registry::new(config.engine.clone()));
        Self::with_registry(config, registry, metrics_handle)
    }

    /// Create a server over an existing registry (shared with producers).
    #[must_use]
    pub fn with_registry(
        config: ServerConfig,
        registry: Arc<Registry>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics_handle: Arc::new(metrics_handle),
            ws_connections: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
            metrics_handle: self.metrics_handle.clone(),
            ws_connections: self.ws_connections.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_upgrade_handler))
            .route("/poll", get(poll_handler))
            .with_state(state)
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(RequestBodyLimitLayer::new(64 * 1024))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind to a TCP port and start serving. Returns the bound address and a
    /// join handle for the server task.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// The session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.registry.len(),
        state.ws_connections.load(Ordering::Relaxed),
    );
    Json(resp)
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// GET /ws — WebSocket upgrade.
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ReconnectQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let current = state.ws_connections.load(Ordering::Relaxed);
    if current >= state.config.max_connections {
        warn!(
            current,
            max = state.config.max_connections,
            "connection limit reached, rejecting WebSocket upgrade"
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let (user, guid) = query.identity();
    let session = state.registry.lookup_or_create(user, guid);
    let last_seen = query.last_seen();
    let ping_interval = state.config.engine.ping_interval();
    let counter = state.ws_connections.clone();
    let max_message_size = state.config.max_message_size;

    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let open = counter.fetch_add(1, Ordering::Relaxed) + 1;
            gauge!(WS_CONNECTIONS_ACTIVE).set(open as f64);
            run_ws_session(socket, session, last_seen, ping_interval).await;
            let open = counter.fetch_sub(1, Ordering::Relaxed) - 1;
            gauge!(WS_CONNECTIONS_ACTIVE).set(open as f64);
        }))
}

/// GET /poll — one long-poll cycle.
async fn poll_handler(
    Query(query): Query<ReconnectQuery>,
    State(state): State<AppState>,
) -> Response {
    run_long_poll(state.registry.clone(), query).await
}
