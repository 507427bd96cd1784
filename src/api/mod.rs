//! HTTP handlers for the webhook endpoint and server status

pub mod status;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use status::{root, status};
pub use webhook::handle_webhook;

/// All routes, with the webhook mounted at `webhook_path`.
pub fn router(state: SharedState, webhook_path: &str) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/status", routing::get(status))
        .route(webhook_path, routing::post(handle_webhook))
        .with_state(state)
}
