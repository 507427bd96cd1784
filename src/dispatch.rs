use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::listener::ListenerRegistry;
use crate::pipeline::ExecutionPipeline;
use crate::run::PipelineState;
use crate::webhook::WebhookEvent;

/// A pipeline run started for one matching listener
pub struct DispatchedRun {
    pub listener: String,
    pub handle: JoinHandle<PipelineState>,
}

/// Routes webhook events to every listener whose pattern matches.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<ListenerRegistry>,
    pipeline: ExecutionPipeline,
}

impl EventDispatcher {
    pub fn new(registry: ListenerRegistry, pipeline: ExecutionPipeline) -> Self {
        Self {
            registry: Arc::new(registry),
            pipeline,
        }
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &ExecutionPipeline {
        &self.pipeline
    }

    /// Spawn one independent pipeline run per matching listener and return
    /// without waiting for any of them.
    pub fn dispatch(&self, event: WebhookEvent) -> Vec<DispatchedRun> {
        let event = Arc::new(event);
        let runs: Vec<DispatchedRun> = self
            .registry
            .matching(&event)
            .map(|listener| {
                info!(
                    "Event {} triggers listener '{}' (pattern '{}')",
                    event.key(),
                    listener.name,
                    listener.pattern
                );

                let name = listener.name.clone();
                let listener = listener.clone();
                let event = Arc::clone(&event);
                let pipeline = self.pipeline.clone();
                let handle = tokio::spawn(async move { pipeline.run(&listener, &event).await });

                DispatchedRun {
                    listener: name,
                    handle,
                }
            })
            .collect();

        if runs.is_empty() {
            debug!("No listener matches {}", event.key());
        }
        runs
    }
}
