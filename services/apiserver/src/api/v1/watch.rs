//! Watch endpoint (server-sent events).
//!
//! Each connection holds one event bus subscription for `pod/{nodename}`.
//! Events are written as `data:` frames the moment they are taken off the
//! subscription; while idle a `:keepalive` comment goes out every keepalive
//! interval. The stream ends when the bus shuts down or a newer watcher for
//! the same node takes over. Dropping the stream (client disconnect) drops
//! the subscription, which deregisters the key.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::HeaderName,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures_core::Stream;
use minipod_api::{frame, SubscriptionKey};
use serde::Deserialize;
use tracing::{error, info};

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::watch::Subscription;

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    pub nodename: Option<String>,
}

/// Stream pod events for a node.
///
/// GET /v1/watch?nodename={node}
pub async fn watch(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let node = query
        .nodename
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request("nodename_required", "nodename query parameter is required")
        })?;

    let subscription = state.bus().subscribe(SubscriptionKey::pods(&node))?;
    info!(node = %node, key = %subscription.key(), "Watch stream opened");

    let keep_alive = KeepAlive::new()
        .interval(state.keepalive())
        .text(frame::KEEPALIVE);

    Ok((
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(event_stream(WatchStream { node, subscription })).keep_alive(keep_alive),
    ))
}

/// Stream state. Logs when the connection goes away.
struct WatchStream {
    node: String,
    subscription: Subscription,
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        info!(node = %self.node, key = %self.subscription.key(), "Watch stream closed");
    }
}

fn event_stream(state: WatchStream) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            let event = state.subscription.recv().await?;
            match serde_json::to_string(&event) {
                Ok(json) => return Some((Ok(Event::default().data(json)), state)),
                Err(e) => {
                    error!(
                        error = %e,
                        node = %state.node,
                        pod_uid = %event.pod.uid,
                        "Failed to serialize watch event"
                    );
                }
            }
        }
    })
}
