//! Health and status endpoints

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;

/// Root health check endpoint
pub async fn root() -> &'static str {
    "longshot - healthy"
}

/// Configured listeners and the runs currently queued or executing.
/// Supports `?listener=name` to narrow both lists.
pub async fn status(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let filter = params.get("listener");
    let wanted = |name: &str| filter.is_none_or(|f| f == name);

    let dispatcher = &state.dispatcher;
    let mut listeners = Vec::new();
    for listener in dispatcher.registry().iter().filter(|l| wanted(&l.name)) {
        listeners.push(json!({
            "name": listener.name,
            "pattern": listener.pattern.to_string(),
            "playbook": listener.spec.playbook_name,
            "busy": dispatcher.pipeline().locks().is_busy(&listener.name).await,
        }));
    }

    let runs: Vec<_> = dispatcher
        .pipeline()
        .runs()
        .active()
        .await
        .into_iter()
        .filter(|run| wanted(&run.listener))
        .collect();
    let active_count = runs.len();

    Json(json!({
        "server": {
            "name": "longshot",
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "listeners": listeners,
        "runs": {
            "active": runs,
            "active_count": active_count,
        },
        "config": {
            "total_listeners": dispatcher.registry().len(),
            "bootstrap_playbook": state.config.ansible.bootstrap_playbook,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_state;
    use crate::pipeline::tests::{RecordingRunner, event};
    use crate::run::Run;
    use axum::http::StatusCode;
    use serde_json::Value;
    use std::sync::Arc;

    async fn status_json(state: SharedState, query: &[(&str, &str)]) -> Value {
        let params = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let response = status(AxumState(state), Query(params)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn root_is_healthy() {
        assert_eq!(root().await, "longshot - healthy");
    }

    #[tokio::test]
    async fn lists_listeners_and_queued_runs() {
        let state = test_state(Arc::new(RecordingRunner::default()));
        let pipeline = state.dispatcher.pipeline();
        let _running = pipeline.locks().acquire("web").await;
        let queued = Run::new("web", &event());
        pipeline.runs().insert(queued.clone()).await;

        let body = status_json(state.clone(), &[]).await;

        assert_eq!(body["server"]["name"], "longshot");
        assert_eq!(body["config"]["total_listeners"], 2);
        assert_eq!(body["config"]["bootstrap_playbook"], "bootstrap.yml");

        let listeners = body["listeners"].as_array().unwrap();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0]["name"], "api");
        assert_eq!(listeners[0]["pattern"], "push:acme/api");
        assert_eq!(listeners[0]["playbook"], "api");
        assert_eq!(listeners[0]["busy"], false);
        assert_eq!(listeners[1]["name"], "web");
        assert_eq!(listeners[1]["pattern"], "push:acme/app:refs/heads/main");
        assert_eq!(listeners[1]["playbook"], "deploy.yml");
        assert_eq!(listeners[1]["busy"], true);

        assert_eq!(body["runs"]["active_count"], 1);
        let run = &body["runs"]["active"][0];
        assert_eq!(run["id"], queued.id.as_str());
        assert_eq!(run["listener"], "web");
        assert_eq!(run["repository"], "acme/app");
        assert_eq!(run["commit_sha"], "abc123");
        assert_eq!(run["state"], "idle");
    }

    #[tokio::test]
    async fn listener_query_narrows_both_lists() {
        let state = test_state(Arc::new(RecordingRunner::default()));
        state
            .dispatcher
            .pipeline()
            .runs()
            .insert(Run::new("web", &event()))
            .await;

        let api = status_json(state.clone(), &[("listener", "api")]).await;
        assert_eq!(api["listeners"].as_array().unwrap().len(), 1);
        assert_eq!(api["listeners"][0]["name"], "api");
        assert_eq!(api["runs"]["active_count"], 0);
        assert_eq!(api["config"]["total_listeners"], 2);

        let web = status_json(state, &[("listener", "web")]).await;
        assert_eq!(web["listeners"][0]["name"], "web");
        assert_eq!(web["runs"]["active_count"], 1);
    }
}
