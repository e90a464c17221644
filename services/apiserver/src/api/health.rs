//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" or "shutting_down".
    pub status: String,

    pub service: String,

    pub version: String,

    /// Current timestamp (RFC 3339).
    pub timestamp: String,

    /// Open watch subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchers: Option<usize>,
}

impl HealthResponse {
    fn new(status: &str, watchers: Option<usize>) -> Self {
        Self {
            status: status.to_string(),
            service: "apiserver".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            watchers,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

/// Is the process up? Does not look at the event bus.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse::new("ok", None))
}

/// Ready while the event bus accepts subscriptions.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let bus = state.bus();
    if bus.is_closed() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new("shutting_down", None)),
        )
    } else {
        (StatusCode::OK, Json(HealthResponse::new("ok", Some(bus.len()))))
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_reflects_bus_state() {
        let state = AppState::in_memory(&crate::config::Config::default());
        let response = readyz(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        state.bus().shutdown();
        let response = readyz(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
