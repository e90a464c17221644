//! Pod API endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use minipod_api::PodSpec;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PodQuery {
    pub nodename: Option<String>,
    pub uid: Option<String>,
}

impl PodQuery {
    fn require_node(&self) -> Result<&str, ApiError> {
        self.nodename
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                ApiError::bad_request("nodename_required", "nodename query parameter is required")
            })
    }
}

fn parse_uid(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("invalid_uid", "Invalid pod UID format"))
}

/// Create a pod on a node.
///
/// POST /v1/pods?nodename={node}
pub async fn create_pod(
    State(state): State<AppState>,
    Query(query): Query<PodQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let node = query.require_node()?;

    if body.is_empty() {
        return Err(ApiError::bad_request("empty_body", "Empty request body"));
    }
    let spec: PodSpec = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "Failed to decode pod spec");
        ApiError::bad_request("malformed_request", format!("Malformed request: {e}"))
    })?;

    let pod = state.pods().create(node, spec).await?;
    Ok((StatusCode::CREATED, Json(pod)))
}

/// Get one pod, or list pods.
///
/// GET /v1/pods?nodename={node}&uid={uid}
/// GET /v1/pods[?nodename={node}]
pub async fn get_pods(
    State(state): State<AppState>,
    Query(query): Query<PodQuery>,
) -> Result<Response, ApiError> {
    match query.uid.as_deref() {
        Some(uid) => {
            let node = query.require_node()?;
            let pod = state.pods().get(node, parse_uid(uid)?).await?;
            Ok(Json(pod).into_response())
        }
        None => {
            let node = query.nodename.as_deref().filter(|n| !n.is_empty());
            let pods = state.pods().list(node).await?;
            Ok(Json(pods).into_response())
        }
    }
}

/// Delete a pod.
///
/// DELETE /v1/pods/{uid}?nodename={node}
pub async fn delete_pod(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<PodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let node = query.require_node()?;
    let pod = state.pods().delete(node, parse_uid(&uid)?).await?;
    Ok(Json(pod))
}
