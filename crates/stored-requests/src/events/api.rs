//! HTTP admin producer.
//!
//! `POST /stored_requests/:id` with a JSON body emits an update for that id;
//! `DELETE /stored_requests/:id` emits an invalidation. Anything else on the
//! path is answered with 405. The handlers only validate and forward; a
//! listener wired to a cache does the actual work.

use {
    super::{channel, EventChannels, EventSender},
    crate::StoredData,
    axum::{
        extract::{Path, State},
        http::StatusCode,
        routing::post,
        Router,
    },
    bytes::Bytes,
};

/// Builds the admin router and the event channels its handlers feed.
pub fn new_events_api() -> (Router, EventChannels) {
    let (sender, channels) = channel();
    let router = Router::new()
        .route("/stored_requests/:id", post(handle_update).delete(handle_invalidate))
        .with_state(sender);
    (router, channels)
}

async fn handle_update(
    State(sender): State<EventSender>,
    Path(id): Path<String>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        return (StatusCode::BAD_REQUEST, "Invalid config data.\n");
    }
    sender.update(StoredData::from([(id, body)])).await;
    (StatusCode::OK, "")
}

async fn handle_invalidate(
    State(sender): State<EventSender>,
    Path(id): Path<String>,
) -> (StatusCode, &'static str) {
    sender.invalidate(vec![id]).await;
    (StatusCode::OK, "")
}
