use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::webhook::WebhookEvent;

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    BootstrapRunning,
    BootstrapFailed,
    DeployRunning,
    DeploySucceeded,
    DeployFailed,
}

/// One trigger of one listener
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: String,
    pub listener: String,
    pub repository: String,
    pub git_ref: String,
    pub commit_sha: String,
    pub state: PipelineState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new run in Idle state
    pub fn new(listener: &str, event: &WebhookEvent) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            listener: listener.to_string(),
            repository: event.repo_full_name.clone(),
            git_ref: event.git_ref.clone(),
            commit_sha: event.after_sha.clone(),
            state: PipelineState::Idle,
            queued_at: Utc::now(),
            started_at: None,
        }
    }

    pub fn transition(&mut self, state: PipelineState) {
        if self.started_at.is_none() && state != PipelineState::Idle {
            self.started_at = Some(Utc::now());
        }
        self.state = state;
    }
}

/// Runs that are queued or executing. Finished runs are dropped.
#[derive(Clone, Default)]
pub struct RunTracker {
    runs: Arc<Mutex<HashMap<String, Run>>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, run: Run) {
        self.runs.lock().await.insert(run.id.clone(), run);
    }

    pub async fn transition(&self, id: &str, state: PipelineState) {
        if let Some(run) = self.runs.lock().await.get_mut(id) {
            run.transition(state);
        }
    }

    pub async fn finish(&self, id: &str) -> Option<Run> {
        self.runs.lock().await.remove(id)
    }

    /// Active runs, oldest first.
    pub async fn active(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.runs.lock().await.values().cloned().collect();
        runs.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.id.cmp(&b.id)));
        runs
    }
}
