//! Local control surface for the desktop shell.
//!
//! A small JSON-over-HTTP endpoint exposing status, connect, disconnect, and
//! mode toggles. The `connected` flag always reflects live engine state;
//! caching it separately diverges on engine-side errors.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::engine::{Engine, EngineState};
use crate::error::EngineError;

/// Shared state behind the control surface handlers.
pub struct ApiState {
    engine: Arc<Engine>,
    sports_mode: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
}

impl ApiState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            sports_mode: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_recv: AtomicU64::new(0),
        }
    }

    pub fn with_sports_mode(self, enabled: bool) -> Self {
        self.sports_mode.store(enabled, Ordering::Relaxed);
        self
    }

    /// Fold transferred byte counts into the status report.
    pub fn record_traffic(&self, sent: u64, recv: u64) {
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_recv.fetch_add(recv, Ordering::Relaxed);
    }
}

/// Control surface HTTP server.
pub struct ApiServer {
    addr: String,
    state: Arc<ApiState>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, state: Arc<ApiState>) -> Self {
        Self {
            addr: addr.into(),
            state,
            shutdown: Mutex::new(None),
        }
    }

    /// Bind and serve in a background task; returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("binding control surface on {}", self.addr))?;
        let local_addr = listener.local_addr()?;

        let app = router(Arc::clone(&self.state));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);

        tokio::spawn(async move {
            let serve = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });
            if let Err(e) = serve.await {
                error!(error = %e, "control surface server error");
            }
        });

        info!(addr = %local_addr, "control surface listening");
        Ok(local_addr)
    }

    /// Drain in-flight requests and stop serving.
    pub fn stop(&self) {
        if let Some(shutdown_tx) = self.shutdown.lock().unwrap().take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Build the control surface router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/connect", post(handle_connect))
        .route("/api/disconnect", post(handle_disconnect))
        .route("/api/config", get(handle_config))
        .route("/api/sports-mode", post(handle_sports_mode))
        .route("/api/health", get(handle_health))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusResponse {
    connected: bool,
    status: String,
    sports_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    uptime: Option<String>,
    bytes_sent: u64,
    bytes_recv: u64,
}

async fn handle_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let engine_state = state.engine.status().await;
    let connected = engine_state == EngineState::Running;

    let uptime = if connected {
        state.engine.uptime().await.map(format_duration)
    } else {
        None
    };

    Json(StatusResponse {
        connected,
        status: engine_state.to_string(),
        sports_mode: state.sports_mode.load(Ordering::Relaxed),
        uptime,
        bytes_sent: state.bytes_sent.load(Ordering::Relaxed),
        bytes_recv: state.bytes_recv.load(Ordering::Relaxed),
    })
}

async fn handle_connect(State(state): State<Arc<ApiState>>) -> Response {
    match state.engine.start().await {
        Ok(()) => {
            info!("engine connected via control surface");
            Json(json!({ "status": "connected" })).into_response()
        }
        Err(EngineError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, "already connected")
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn handle_disconnect(State(state): State<Arc<ApiState>>) -> Response {
    match state.engine.stop().await {
        Ok(()) => {
            info!("engine disconnected via control surface");
            Json(json!({ "status": "disconnected" })).into_response()
        }
        Err(EngineError::NotRunning(_)) => error_response(StatusCode::CONFLICT, "not connected"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn handle_config(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({ "config": state.engine.config_pretty().await }))
}

#[derive(Debug, Deserialize)]
struct SportsModeRequest {
    enabled: bool,
}

async fn handle_sports_mode(State(state): State<Arc<ApiState>>, body: String) -> Response {
    let request: SportsModeRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request body"),
    };

    state.sports_mode.store(request.enabled, Ordering::Relaxed);
    info!(enabled = request.enabled, "sports mode toggled");
    Json(json!({ "sports_mode": request.enabled })).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn error_response(code: StatusCode, message: &str) -> Response {
    (code, Json(json!({ "error": message }))).into_response()
}

/// Cross-origin headers for the desktop shell; preflights answer 204.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_truncates_to_seconds() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(83)), "1m23s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
        assert_eq!(format_duration(Duration::from_millis(900)), "0s");
    }
}
