//! Running `ansible-playbook` as an external process.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::SplitStream;
use tracing::{info, warn};

use crate::error::{LongshotError, Result};

const PLAYBOOK_EXTENSIONS: [&str; 2] = [".yml", ".yaml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of output as the playbook emits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// Everything needed to start one playbook run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookInvocation {
    pub playbook: String,
    pub inventory: PathBuf,
    pub variables: BTreeMap<String, Value>,
    pub host_limit: Option<String>,
    pub tags: Option<String>,
    pub skip_tags: Option<String>,
    pub verbosity: Option<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl PlaybookInvocation {
    /// Playbook file name, `.yml` appended when no extension is given.
    pub fn playbook_file(&self) -> String {
        if PLAYBOOK_EXTENSIONS
            .iter()
            .any(|ext| self.playbook.ends_with(ext))
        {
            self.playbook.clone()
        } else {
            format!("{}.yml", self.playbook)
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.playbook_file(),
            "-i".to_string(),
            self.inventory.to_string_lossy().into_owned(),
        ];

        if !self.variables.is_empty() {
            args.push("--extra-vars".to_string());
            args.push(Value::Object(self.variables.clone().into_iter().collect()).to_string());
        }
        if let Some(limit) = &self.host_limit {
            args.push("--limit".to_string());
            args.push(limit.clone());
        }
        if let Some(tags) = &self.tags {
            args.push("--tags".to_string());
            args.push(tags.clone());
        }
        if let Some(skip_tags) = &self.skip_tags {
            args.push("--skip-tags".to_string());
            args.push(skip_tags.clone());
        }
        if let Some(verbosity) = &self.verbosity {
            args.push(format!("-{}", verbosity));
        }
        args
    }
}

/// Exit status and interleaved stdout/stderr of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybookOutcome {
    pub succeeded: bool,
    pub combined_output: String,
}

/// Executes playbooks. Output lines are pushed to `chunks` as they arrive;
/// a closed receiver is ignored.
#[async_trait]
pub trait PlaybookRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &PlaybookInvocation,
        chunks: UnboundedSender<OutputChunk>,
    ) -> Result<PlaybookOutcome>;
}

/// Spawns the configured ansible command. The child is killed if the run
/// future is dropped, which is how timeouts stop it.
pub struct AnsibleRunner {
    command: String,
}

impl AnsibleRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl PlaybookRunner for AnsibleRunner {
    async fn run(
        &self,
        invocation: &PlaybookInvocation,
        chunks: UnboundedSender<OutputChunk>,
    ) -> Result<PlaybookOutcome> {
        let args = invocation.args();
        info!(
            "Running (cwd = '{}'): {} {}",
            invocation.working_dir.display(),
            self.command,
            args.join(" ")
        );

        let mut child = Command::new(&self.command)
            .args(&args)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LongshotError::ExecutionFailed {
                playbook: invocation.playbook_file(),
                message: format!("failed to start '{}': {}", self.command, e),
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(LongshotError::ExecutionFailed {
                playbook: invocation.playbook_file(),
                message: "child output pipes unavailable".to_string(),
            });
        };

        let stdout_lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
            .map(|line| (OutputStream::Stdout, line));
        let stderr_lines = SplitStream::new(BufReader::new(stderr).split(b'\n'))
            .map(|line| (OutputStream::Stderr, line));
        let mut lines = stdout_lines.merge(stderr_lines);

        let mut combined_output = String::new();
        while let Some((stream, line)) = lines.next().await {
            let text = match line {
                Ok(bytes) => decode_line(bytes),
                Err(e) => {
                    warn!("Skipping unreadable {:?} output: {}", stream, e);
                    continue;
                }
            };
            combined_output.push_str(&text);
            combined_output.push('\n');
            let _ = chunks.send(OutputChunk { stream, text });
        }

        let status = child.wait().await?;
        if !status.success() {
            combined_output.push_str(&format!("{} exited with {}\n", self.command, status));
        }

        Ok(PlaybookOutcome {
            succeeded: status.success(),
            combined_output,
        })
    }
}

/// Tasks may print file contents in any encoding; invalid UTF-8 is replaced
/// rather than losing the line.
fn decode_line(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn invocation() -> PlaybookInvocation {
        PlaybookInvocation {
            playbook: "deploy".to_string(),
            inventory: PathBuf::from("inventory/production"),
            variables: BTreeMap::from([
                ("repo_ref".to_string(), json!("refs/heads/main")),
                ("restart_service".to_string(), json!(false)),
            ]),
            host_limit: Some("web".to_string()),
            tags: Some("app".to_string()),
            skip_tags: Some("db".to_string()),
            verbosity: Some("vv".to_string()),
            working_dir: std::env::temp_dir(),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn builds_playbook_arguments() {
        assert_eq!(
            invocation().args(),
            vec![
                "deploy.yml",
                "-i",
                "inventory/production",
                "--extra-vars",
                r#"{"repo_ref":"refs/heads/main","restart_service":false}"#,
                "--limit",
                "web",
                "--tags",
                "app",
                "--skip-tags",
                "db",
                "-vv",
            ]
        );
    }

    #[test]
    fn keeps_explicit_extension_and_skips_unset_options() {
        let mut minimal = invocation();
        minimal.playbook = "site.yaml".to_string();
        minimal.variables.clear();
        minimal.host_limit = None;
        minimal.tags = None;
        minimal.skip_tags = None;
        minimal.verbosity = None;

        assert_eq!(minimal.args(), vec!["site.yaml", "-i", "inventory/production"]);
    }

    #[tokio::test]
    async fn streams_output_of_successful_command() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = AnsibleRunner::new("echo")
            .run(&invocation(), tx)
            .await
            .unwrap();

        assert!(outcome.succeeded);
        assert!(outcome.combined_output.starts_with("deploy.yml -i inventory/production"));

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.stream, OutputStream::Stdout);
        assert!(chunk.text.contains("--limit web"));
    }

    #[tokio::test]
    async fn runs_in_working_dir_with_configured_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("print_env.yml"),
            "echo \"value=$LONGSHOT_TEST_VALUE\"\necho \"args=$*\" >&2\n",
        )
        .unwrap();

        let mut with_env = invocation();
        with_env.playbook = "print_env".to_string();
        with_env.working_dir = dir.path().to_path_buf();
        with_env
            .env
            .insert("LONGSHOT_TEST_VALUE".to_string(), "from-config".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = AnsibleRunner::new("sh").run(&with_env, tx).await.unwrap();

        assert!(outcome.succeeded);
        assert!(outcome.combined_output.contains("value=from-config"));
        assert!(outcome.combined_output.contains("args=-i inventory/production"));

        let mut streams = Vec::new();
        while let Some(chunk) = rx.recv().await {
            streams.push(chunk.stream);
        }
        assert!(streams.contains(&OutputStream::Stdout));
        assert!(streams.contains(&OutputStream::Stderr));
    }

    #[test]
    fn decodes_crlf_and_invalid_utf8() {
        assert_eq!(decode_line(b"ok: [web1]\r".to_vec()), "ok: [web1]");
        assert_eq!(decode_line(b"caf\xe9".to_vec()), "caf\u{FFFD}");
    }

    #[tokio::test]
    async fn keeps_lines_that_are_not_utf8() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("latin1.yml"),
            "printf 'before\\nfatal: caf\\351 failed\\nafter\\n'\n",
        )
        .unwrap();

        let mut latin1 = invocation();
        latin1.playbook = "latin1".to_string();
        latin1.working_dir = dir.path().to_path_buf();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = AnsibleRunner::new("sh").run(&latin1, tx).await.unwrap();

        assert!(outcome.succeeded);
        assert_eq!(
            outcome.combined_output,
            "before\nfatal: caf\u{FFFD} failed\nafter\n"
        );

        let mut lines = Vec::new();
        while let Some(chunk) = rx.recv().await {
            lines.push(chunk.text);
        }
        assert_eq!(lines, vec!["before", "fatal: caf\u{FFFD} failed", "after"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failed_outcome() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = AnsibleRunner::new("false")
            .run(&invocation(), tx)
            .await
            .unwrap();

        assert!(!outcome.succeeded);
        assert!(outcome.combined_output.contains("false exited with"));
    }

    #[tokio::test]
    async fn missing_command_is_an_execution_error() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = AnsibleRunner::new("longshot-definitely-not-installed")
            .run(&invocation(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, LongshotError::ExecutionFailed { .. }));
    }
}
