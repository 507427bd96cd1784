//! Bootstrap-then-deploy execution for one triggered listener.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::ansible::{OutputChunk, OutputStream, PlaybookInvocation, PlaybookRunner};
use crate::config::LongshotConfig;
use crate::error::LongshotError;
use crate::listener::Listener;
use crate::lock::ListenerLocks;
use crate::notify::{Notification, Notifier};
use crate::run::{PipelineState, Run, RunTracker};
use crate::webhook::WebhookEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Bootstrap,
    Deploy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Bootstrap => f.write_str("bootstrap"),
            Stage::Deploy => f.write_str("deploy"),
        }
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub combined_output: String,
    pub stage: Stage,
    pub playbook: String,
}

/// Which live output streams are forwarded to the chat channel.
#[derive(Debug, Clone, Copy)]
struct ChunkForwarding {
    stdout: bool,
    stderr: bool,
}

impl ChunkForwarding {
    fn forwards(&self, stream: OutputStream) -> bool {
        match stream {
            OutputStream::Stdout => self.stdout,
            OutputStream::Stderr => self.stderr,
        }
    }
}

/// Shared by every run; cloning is cheap.
#[derive(Clone)]
pub struct ExecutionPipeline {
    config: Arc<LongshotConfig>,
    runner: Arc<dyn PlaybookRunner>,
    notifier: Arc<dyn Notifier>,
    locks: ListenerLocks,
    runs: RunTracker,
    timeout: Duration,
}

impl ExecutionPipeline {
    pub fn new(
        config: Arc<LongshotConfig>,
        runner: Arc<dyn PlaybookRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let timeout = config.ansible.timeout();
        Self {
            config,
            runner,
            notifier,
            locks: ListenerLocks::new(),
            runs: RunTracker::new(),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn runs(&self) -> &RunTracker {
        &self.runs
    }

    pub fn locks(&self) -> &ListenerLocks {
        &self.locks
    }

    fn event_variables(event: &WebhookEvent) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("repo_url".to_string(), json!(event.ssh_clone_url)),
            ("repo_ref".to_string(), json!(event.git_ref)),
            ("repo_sha".to_string(), json!(event.after_sha)),
        ])
    }

    fn invocation(
        &self,
        playbook: &str,
        listener: &Listener,
        variables: BTreeMap<String, Value>,
    ) -> PlaybookInvocation {
        let spec = &listener.spec;
        PlaybookInvocation {
            playbook: playbook.to_string(),
            inventory: self
                .config
                .ansible
                .inventory_path(spec.inventory_name.as_deref()),
            variables,
            host_limit: spec.host_limit.clone(),
            tags: spec.tags.clone(),
            skip_tags: spec.skip_tags.clone(),
            verbosity: self.config.verbosity(),
            working_dir: self.config.ansible.playbook_dir(),
            env: self.config.env.clone(),
        }
    }

    /// The shared bootstrap playbook, run against the listener's inventory.
    pub fn bootstrap_invocation(&self, listener: &Listener, event: &WebhookEvent) -> PlaybookInvocation {
        let mut variables = Self::event_variables(event);
        variables.insert("restart_service".to_string(), json!(false));
        self.invocation(&self.config.ansible.bootstrap_playbook, listener, variables)
    }

    pub fn deploy_invocation(&self, listener: &Listener, event: &WebhookEvent) -> PlaybookInvocation {
        self.invocation(
            &listener.spec.playbook_name,
            listener,
            Self::event_variables(event),
        )
    }

    /// Run both stages for one trigger and report each outcome.
    ///
    /// Waits for any earlier run of the same listener to finish first. Deploy
    /// only starts after a successful bootstrap. Returns the terminal state.
    pub async fn run(&self, listener: &Listener, event: &WebhookEvent) -> PipelineState {
        let run = Run::new(&listener.name, event);
        let run_id = run.id.clone();
        self.runs.insert(run).await;

        let span = info_span!("run", run_id = %run_id, listener = %listener.name);
        async {
            let _guard = self.locks.acquire(&listener.name).await;
            info!(
                "Running [{}] on: {}:{}#{}",
                listener.spec.playbook_name,
                event.repo_full_name,
                event.git_ref,
                event.after_sha
            );

            self.runs
                .transition(&run_id, PipelineState::BootstrapRunning)
                .await;
            let bootstrap = self
                .run_stage(Stage::Bootstrap, self.bootstrap_invocation(listener, event))
                .await;
            self.report(&bootstrap, listener).await;

            let state = if !bootstrap.succeeded {
                warn!("Bootstrap failed, skipping [{}]", listener.spec.playbook_name);
                PipelineState::BootstrapFailed
            } else {
                self.runs
                    .transition(&run_id, PipelineState::DeployRunning)
                    .await;
                let deploy = self
                    .run_stage(Stage::Deploy, self.deploy_invocation(listener, event))
                    .await;
                self.report(&deploy, listener).await;

                if deploy.succeeded {
                    PipelineState::DeploySucceeded
                } else {
                    PipelineState::DeployFailed
                }
            };

            self.runs.finish(&run_id).await;
            info!("Run finished: {:?}", state);
            state
        }
        .instrument(span)
        .await
    }

    async fn run_stage(&self, stage: Stage, invocation: PlaybookInvocation) -> ExecutionResult {
        let playbook = invocation.playbook_file();
        let (forward_tx, forward_rx) = mpsc::unbounded_channel();
        tokio::spawn(
            forward_chunks(
                forward_rx,
                self.notifier.clone(),
                ChunkForwarding {
                    stdout: self.config.slack.forwards_stdout(),
                    stderr: self.config.slack.forwards_stderr(),
                },
            )
            .in_current_span(),
        );

        // Copy of the streamed output; survives a cancelled runner.
        let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
        let transcript = tokio::spawn(async move {
            let mut transcript = String::new();
            while let Some(chunk) = rx.recv().await {
                transcript.push_str(&chunk.text);
                transcript.push('\n');
                let _ = forward_tx.send(chunk);
            }
            transcript
        });

        let outcome = tokio::time::timeout(self.timeout, self.runner.run(&invocation, tx)).await;
        let (succeeded, combined_output) = match outcome {
            Ok(Ok(outcome)) => (outcome.succeeded, outcome.combined_output),
            Ok(Err(e)) => {
                error!("{} stage could not run: {}", stage, e);
                (false, e.to_string())
            }
            Err(_) => {
                let e = LongshotError::ExecutionTimedOut {
                    playbook: playbook.clone(),
                    seconds: self.timeout.as_secs(),
                };
                error!("{}", e);
                let mut output = transcript.await.unwrap_or_default();
                output.push_str(&e.to_string());
                (false, output)
            }
        };

        ExecutionResult {
            succeeded,
            combined_output,
            stage,
            playbook,
        }
    }

    /// Delivery failures are logged and never change the run's outcome.
    async fn report(&self, result: &ExecutionResult, listener: &Listener) {
        if result.succeeded {
            info!("****** [SUCCESS] ****** {} [{}]", result.stage, result.playbook);
        } else {
            error!("****** [ERROR] ****** {} [{}]", result.stage, result.playbook);
        }

        let notification =
            Notification::from_result(result, &listener.name, &listener.spec.playbook_name);
        if let Err(e) = self.notifier.send(&notification).await {
            error!(
                "Failed to deliver {} notification for [{}]: {}",
                result.stage, result.playbook, e
            );
        }
    }
}

async fn forward_chunks(
    mut chunks: UnboundedReceiver<OutputChunk>,
    notifier: Arc<dyn Notifier>,
    forwarding: ChunkForwarding,
) {
    while let Some(chunk) = chunks.recv().await {
        match chunk.stream {
            OutputStream::Stdout => debug!(target: "longshot::playbook", "{}", chunk.text),
            OutputStream::Stderr => debug!(target: "longshot::playbook", "stderr: {}", chunk.text),
        }

        if forwarding.forwards(chunk.stream) {
            let notification = Notification::from_chunk(chunk.stream, &chunk.text);
            if let Err(e) = notifier.send(&notification).await {
                warn!("Failed to forward playbook output: {}", e);
            }
        }
    }
}
