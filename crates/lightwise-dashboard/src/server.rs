//! HTTP server implementation using axum.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use lightwise_core::PoleDraft;
use lightwise_telemetry::Metrics;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};
use crate::state::{DashboardState, ACTIVITY_LIMIT};
use crate::types::{
    AckResponse, CreatePoleRequest, DashboardMessage, ErrorResponse, SimulateMotionRequest,
};

/// Buffered live updates per slow client.
const LIVE_CHANNEL_CAPACITY: usize = 64;

/// Connection limiter to prevent too many concurrent WebSocket connections.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot. The slot is released when the guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: self.clone(),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    dashboard_state: DashboardState,
    broadcast_tx: broadcast::Sender<String>,
    connection_limiter: Arc<ConnectionLimiter>,
    config: DashboardConfig,
}

impl AppState {
    pub fn new(
        dashboard_state: DashboardState,
        broadcast_tx: broadcast::Sender<String>,
        config: DashboardConfig,
    ) -> Self {
        Self {
            dashboard_state,
            broadcast_tx,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
        }
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/metrics", get(get_metrics))
        .route("/api/status", get(get_status))
        .route("/api/activity", get(get_activity))
        .route("/api/simulate-motion", post(simulate_motion))
        .route("/api/telemetry", get(get_telemetry))
        .route(
            "/api/poles",
            get(list_poles).post(create_pole).delete(clear_poles),
        )
        .route("/api/poles/{id}", delete(remove_pole))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// Prometheus text exposition.
async fn get_metrics() -> Response {
    match Metrics::render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_status(State(state): State<AppState>) -> Json<crate::types::StatusSnapshot> {
    Json(state.dashboard_state.collect_status())
}

async fn get_activity(State(state): State<AppState>) -> Json<Vec<lightwise_core::ActivityEvent>> {
    Json(state.dashboard_state.collect_activity(ACTIVITY_LIMIT))
}

/// Body is optional; an empty body targets the default pole.
async fn simulate_motion(State(state): State<AppState>, body: Bytes) -> Response {
    let request = if body.is_empty() {
        SimulateMotionRequest::default()
    } else {
        match serde_json::from_slice::<SimulateMotionRequest>(&body) {
            Ok(request) => request,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    let ok = state
        .dashboard_state
        .simulate_motion(request.pole_id.as_deref());
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(AckResponse { ok })).into_response()
}

async fn get_telemetry(State(state): State<AppState>) -> Response {
    match state.dashboard_state.fetch_telemetry().await {
        Ok(record) => Json(record).into_response(),
        Err(e) => {
            warn!(error = %e, "Telemetry fetch failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn list_poles(State(state): State<AppState>) -> Json<Vec<lightwise_core::Pole>> {
    Json(state.dashboard_state.list_poles())
}

async fn create_pole(
    State(state): State<AppState>,
    Json(request): Json<CreatePoleRequest>,
) -> Response {
    let draft = PoleDraft::from(request);
    match state.dashboard_state.add_pole(&draft) {
        Ok(poles) => (StatusCode::CREATED, Json(poles)).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn remove_pole(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<lightwise_core::Pole>> {
    Json(state.dashboard_state.remove_pole(&id))
}

async fn clear_poles(State(state): State<AppState>) -> StatusCode {
    state.dashboard_state.clear_poles();
    StatusCode::NO_CONTENT
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let guard = match state.connection_limiter.try_acquire() {
        Some(guard) => guard,
        None => {
            warn!(
                current = state.connection_limiter.current_count(),
                max = state.config.max_connections,
                "WebSocket connection limit reached"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    info!(
        connections = state.connection_limiter.current_count(),
        "New WebSocket connection"
    );

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, guard))
}

/// Handle a WebSocket connection. Holds its limiter slot until it returns.
async fn handle_ws_connection(socket: WebSocket, state: AppState, _guard: ConnectionGuard) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no update falls in between
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    let initial_msg = DashboardMessage::Snapshot(state.dashboard_state.collect_status());
    if let Ok(json) = serde_json::to_string(&initial_msg) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            debug!("Failed to send initial snapshot, client disconnected");
            return;
        }
    }

    // Watch for client close; pings are answered by axum
    let mut incoming_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    debug!("Client sent close frame");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
                _ => {}
            }
        }
    });

    loop {
        tokio::select! {
            result = broadcast_rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            debug!("Failed to send message, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "WebSocket client lagged, catching up");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }
            _ = &mut incoming_task => {
                debug!("Incoming task completed, closing connection");
                break;
            }
        }
    }

    incoming_task.abort();
    info!(
        connections = state.connection_limiter.current_count().saturating_sub(1),
        "WebSocket connection closed"
    );
}

/// Run the dashboard HTTP server.
pub async fn run_server(
    dashboard_state: DashboardState,
    config: DashboardConfig,
) -> DashboardResult<()> {
    let (broadcast_tx, _) = broadcast::channel::<String>(LIVE_CHANNEL_CAPACITY);

    tokio::spawn(crate::broadcast::run_event_pump(
        dashboard_state.connector().subscribe(),
        dashboard_state.poles().clone(),
        broadcast_tx.clone(),
    ));

    let state = AppState::new(dashboard_state, broadcast_tx, config.clone());
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(port = config.port, "Starting dashboard server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| DashboardError::Bind {
            port: config.port,
            source,
        })?;
    axum::serve(listener, app).await?;

    Ok(())
}
