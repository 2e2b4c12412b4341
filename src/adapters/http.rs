//! HTTP adapter: the hosting platform's invocation contract.
//!
//! - `POST /invocations` takes a JSON object and answers with a JSON string
//! - `GET /ping` reports health and the time of the last invocation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::Channel;
use crate::agent::InvocationPayload;
use crate::runtime::AgentRuntime;

#[derive(Clone)]
struct AppState {
    runtime: Arc<AgentRuntime>,
    /// Unix seconds of the last state change
    last_update: Arc<AtomicI64>,
}

/// Build the router serving the invocation contract.
pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    let state = AppState {
        runtime,
        last_update: Arc::new(AtomicI64::new(chrono::Utc::now().timestamp())),
    };

    Router::new()
        .route("/invocations", post(invoke))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(reason) => {
            warn!("Rejected invocation: {}", reason);
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response();
        }
    };

    state.last_update.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    let result = state.runtime.handle(&payload).await;
    state.last_update.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);

    match result {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn parse_payload(body: &[u8]) -> Result<InvocationPayload, String> {
    let value: Value = serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {}", e))?;
    if !value.is_object() {
        return Err("payload must be a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("invalid payload: {}", e))
}

async fn ping(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "Healthy",
        "time_of_last_update": state.last_update.load(Ordering::Relaxed),
    }))
}

/// Serves the runtime over HTTP until Ctrl-C, SIGTERM or [`Channel::stop`].
pub struct HttpChannel {
    runtime: Arc<AgentRuntime>,
    addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl HttpChannel {
    /// Listen on all interfaces at `port`.
    pub fn new(runtime: Arc<AgentRuntime>, port: u16) -> Self {
        Self::with_addr(runtime, SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn with_addr(runtime: Arc<AgentRuntime>, addr: SocketAddr) -> Self {
        Self {
            runtime,
            addr,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

impl Channel for HttpChannel {
    fn name(&self) -> &str {
        "http"
    }

    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send {
        let runtime = self.runtime.clone();
        let addr = self.addr;
        let stop = self.shutdown.clone();

        async move {
            let listener = TcpListener::bind(addr).await?;
            info!("Listening on {}", listener.local_addr()?);

            axum::serve(listener, router(runtime))
                .with_graceful_shutdown(shutdown_signal(stop))
                .await?;

            info!("HTTP channel stopped");
            Ok(())
        }
    }

    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send {
        let stop = self.shutdown.clone();
        async move {
            stop.notify_one();
            Ok(())
        }
    }
}

async fn shutdown_signal(stop: Arc<Notify>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
        _ = stop.notified() => info!("Stop requested, shutting down"),
    }
}
