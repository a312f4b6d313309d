//! HTTP surface for the delivery trigger.
//!
//! ## Endpoints
//!
//! - `GET /health`: liveness probe
//! - `POST /trigger/sweep`: run one sweep now; requires `Authorization: Bearer <token>`

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use chrono::Utc;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::TriggerConfig;
use crate::error::{NudgeError, Result};
use crate::trigger::DeliveryTrigger;

#[derive(Clone)]
struct AppState {
    trigger: DeliveryTrigger,
    bearer_token: Option<String>,
}

/// Running trigger endpoint.
pub struct TriggerServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TriggerServer {
    /// Bind `{config.host}:{config.port}` (port `0` auto-assigns) and serve in
    /// a background task.
    ///
    /// # Errors
    ///
    /// Returns [`NudgeError::Config`] if the listener cannot bind.
    pub async fn start(trigger: DeliveryTrigger, config: &TriggerConfig) -> Result<Self> {
        if config.bearer_token.as_deref().is_none_or(str::is_empty) {
            warn!("trigger bearer token is not set; every sweep request will be rejected");
        }
        let state = AppState {
            trigger,
            bearer_token: config.bearer_token.clone(),
        };

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/trigger/sweep", post(handle_sweep))
            .with_state(state);

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| NudgeError::Config(format!("trigger server bind {bind_addr} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| NudgeError::Config(format!("failed to get local addr: {e}")))?;

        info!("trigger endpoint listening on http://{addr}");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("trigger server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for TriggerServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An unset or empty expected token rejects every caller.
fn bearer_is_valid(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return false;
    };
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let candidate = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();
    !expected_token.is_empty() && candidate == expected_token
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn handle_sweep(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        );
    }

    match state.trigger.sweep(Utc::now()).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::to_value(summary).unwrap_or_default()),
        ),
        Err(e) => {
            warn!("sweep request failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}
