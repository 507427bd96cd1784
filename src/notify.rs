//! Slack notifications: output truncation, message formatting and delivery.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::ansible::OutputStream;
use crate::config::SlackConfig;
use crate::error::{LongshotError, Result};
use crate::pipeline::{ExecutionResult, Stage};

/// Maximum number of characters of playbook output put into one message
pub const MAX_OUTPUT_CHARS: usize = 7000;

pub const TRUNCATION_MARKER: &str = "[ Output truncated... ]\n\n";

pub const SUCCESS_COLOR: &str = "#36a64f";
pub const ERROR_COLOR: &str = "#D50200";
pub const STDOUT_COLOR: &str = "#439FE0";

const CODE_FENCE: &str = "```";

/// Keep at most the last `MAX_OUTPUT_CHARS` characters of `text`.
///
/// The tail is what matters when a playbook fails, so the head is dropped and
/// replaced by `TRUNCATION_MARKER`.
pub fn truncate_output(text: &str) -> String {
    let char_count = text.chars().count();
    if char_count <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }

    let tail_start = text
        .char_indices()
        .nth(char_count - MAX_OUTPUT_CHARS)
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    let mut truncated = String::with_capacity(TRUNCATION_MARKER.len() + text.len() - tail_start);
    truncated.push_str(TRUNCATION_MARKER);
    truncated.push_str(&text[tail_start..]);
    truncated
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub color: String,
    pub pretext: String,
    pub body: String,
    pub timestamp_seconds: i64,
}

impl Notification {
    /// Outcome message for one finished pipeline stage.
    ///
    /// The brackets always name the listener's playbook as configured, so both
    /// stages of one trigger are headed alike; the stage follows the listener
    /// name, and a bootstrap stage also names the playbook that actually ran.
    pub fn from_result(
        result: &ExecutionResult,
        listener_name: &str,
        playbook_name: &str,
    ) -> Self {
        let (color, status) = if result.succeeded {
            (SUCCESS_COLOR, "SUCCESS")
        } else {
            (ERROR_COLOR, "ERROR")
        };
        let stage = match result.stage {
            Stage::Bootstrap => format!("{} via {}", result.stage, result.playbook),
            Stage::Deploy => result.stage.to_string(),
        };

        Self {
            color: color.to_string(),
            pretext: format!(
                "[{}] [{}] {} ({})",
                status, playbook_name, listener_name, stage
            ),
            body: code_block(&truncate_output(&result.combined_output)),
            timestamp_seconds: Utc::now().timestamp(),
        }
    }

    /// Low-priority message for a chunk of live playbook output.
    pub fn from_chunk(stream: OutputStream, text: &str) -> Self {
        let color = match stream {
            OutputStream::Stdout => STDOUT_COLOR,
            OutputStream::Stderr => ERROR_COLOR,
        };

        Self {
            color: color.to_string(),
            pretext: String::new(),
            body: code_block(&truncate_output(text)),
            timestamp_seconds: Utc::now().timestamp(),
        }
    }

    pub fn to_attachment(&self) -> SlackAttachment {
        SlackAttachment {
            color: self.color.clone(),
            pretext: (!self.pretext.is_empty()).then(|| self.pretext.clone()),
            fallback: if self.pretext.is_empty() {
                self.body.clone()
            } else {
                format!("*{}*\n{}", self.pretext, self.body)
            },
            text: self.body.clone(),
            ts: self.timestamp_seconds,
            mrkdwn_in: vec!["text".to_string(), "pretext".to_string()],
        }
    }
}

fn code_block(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    format!("{}{}{}", CODE_FENCE, text, CODE_FENCE)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlackAttachment {
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,
    pub fallback: String,
    pub text: String,
    pub ts: i64,
    pub mrkdwn_in: Vec<String>,
}

/// Body of an incoming-webhook POST.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlackMessage {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<SlackAttachment>,
}

/// Outbound chat channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Posts notifications to a Slack incoming webhook. Without a webhook URL
/// messages are only logged.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    username: String,
    icon_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                LongshotError::ConfigError(format!("Failed to build Slack HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone().filter(|url| !url.is_empty()),
            username: config.username().to_string(),
            icon_url: config.icon_url.clone(),
        })
    }

    pub fn message_for(&self, notification: &Notification) -> SlackMessage {
        SlackMessage {
            username: self.username.clone(),
            icon_url: self.icon_url.clone(),
            attachments: vec![notification.to_attachment()],
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let Some(url) = &self.webhook_url else {
            debug!(
                "Slack webhook not configured, dropping notification: {}",
                notification.pretext
            );
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&self.message_for(notification))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LongshotError::NotificationDelivery(format!(
                "Slack responded with {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}
