//! API v1 routes.

mod pods;
mod watch;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/pods", get(pods::get_pods).post(pods::create_pod))
        .route("/pods/{uid}", delete(pods::delete_pod))
        .route("/watch", get(watch::watch))
}
