//! Webhook related structures

use serde::Deserialize;

use crate::error::{LongshotError, Result};

/// Header GitHub uses to classify the delivery (header names are case-insensitive).
pub const EVENT_HEADER: &str = "x-github-event";

/// One repository-change notification, reduced to what listeners match on
/// and what the playbooks receive as variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_type: String,
    pub repo_full_name: String,
    pub git_ref: String,
    pub after_sha: String,
    pub ssh_clone_url: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    repository: Option<RepositoryPayload>,
    #[serde(rename = "ref", default)]
    git_ref: Option<String>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
    #[serde(default)]
    ssh_url: Option<String>,
}

impl WebhookEvent {
    /// Build an event from the delivery's event type and raw JSON body.
    ///
    /// Events without a `ref` (tag deletions, issue events, ...) still carry a
    /// repository; the missing fields are left empty so that only listeners
    /// with a wildcard `ref` can match them.
    pub fn from_payload(event_type: &str, body: &[u8]) -> Result<Self> {
        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(LongshotError::InvalidPayload(
                "empty event type".to_string(),
            ));
        }

        let payload: PushPayload = serde_json::from_slice(body)
            .map_err(|e| LongshotError::InvalidPayload(format!("Could not parse JSON body: {}", e)))?;

        let repository = payload.repository.ok_or_else(|| {
            LongshotError::InvalidPayload("No repository field in payload".to_string())
        })?;

        Ok(Self {
            event_type: event_type.to_string(),
            repo_full_name: repository.full_name,
            git_ref: payload.git_ref.unwrap_or_default(),
            after_sha: payload.after.unwrap_or_default(),
            ssh_clone_url: repository.ssh_url.unwrap_or_default(),
        })
    }

    /// `event:repo:ref`, the key a fully specified listener pattern equals.
    pub fn key(&self) -> String {
        [
            self.event_type.as_str(),
            self.repo_full_name.as_str(),
            self.git_ref.as_str(),
        ]
        .join(":")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_push_payload() {
        let body = json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": {
                "name": "app",
                "full_name": "acme/app",
                "ssh_url": "git@host:acme/app.git"
            }
        });

        let event = WebhookEvent::from_payload("push", body.to_string().as_bytes()).unwrap();

        assert_eq!(
            event,
            WebhookEvent {
                event_type: "push".to_string(),
                repo_full_name: "acme/app".to_string(),
                git_ref: "refs/heads/main".to_string(),
                after_sha: "abc123".to_string(),
                ssh_clone_url: "git@host:acme/app.git".to_string(),
            }
        );
        assert_eq!(event.key(), "push:acme/app:refs/heads/main");
    }

    #[test]
    fn missing_ref_is_left_empty() {
        let body = json!({ "repository": { "full_name": "acme/app" } });

        let event = WebhookEvent::from_payload("issues", body.to_string().as_bytes()).unwrap();

        assert_eq!(event.git_ref, "");
        assert_eq!(event.after_sha, "");
        assert_eq!(event.ssh_clone_url, "");
    }

    #[test]
    fn rejects_payload_without_repository() {
        let err = WebhookEvent::from_payload("push", br#"{"ref":"refs/heads/main"}"#).unwrap_err();
        assert!(matches!(err, LongshotError::InvalidPayload(_)));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(WebhookEvent::from_payload("push", b"{not json").is_err());
        assert!(WebhookEvent::from_payload("  ", b"{}").is_err());
    }
}
