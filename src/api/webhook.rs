//! Webhook handler for GitHub repository events

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
};
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::webhook::{EVENT_HEADER, WebhookEvent};

const PING_EVENT: &str = "ping";

/// Handles the GitHub webhook POST request.
///
/// Matching runs are spawned in the background so the delivery is answered
/// immediately: `202` when at least one listener was triggered, `204` when
/// none matched.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(event_type) = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("Webhook delivery without {} header", EVENT_HEADER);
        return StatusCode::BAD_REQUEST;
    };

    if event_type == PING_EVENT {
        info!("Received ping event");
        return StatusCode::NO_CONTENT;
    }

    let event = match WebhookEvent::from_payload(event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            info!("Rejected {} event: {}", event_type, e);
            return StatusCode::BAD_REQUEST;
        }
    };
    debug!("{:?}", event);

    let runs = state.dispatcher.dispatch(event);
    if runs.is_empty() {
        return StatusCode::NO_CONTENT;
    }

    info!(
        "Triggered {} listener(s): {}",
        runs.len(),
        runs.iter()
            .map(|run| run.listener.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    StatusCode::ACCEPTED
}
