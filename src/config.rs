//! TOML configuration for the webhook server, playbook runner and Slack.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LongshotError, Result};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3402;
const DEFAULT_WEBHOOK_PATH: &str = "/longshot";
const DEFAULT_PROJECT_DIR: &str = "./";
const DEFAULT_PLAYBOOK_DIR: &str = "./ansible/";
const DEFAULT_INVENTORY_DIR: &str = "./ansible/inventory/";
const DEFAULT_ANSIBLE_COMMAND: &str = "ansible-playbook";
const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_SLACK_USERNAME: &str = "Longshot";
const DEFAULT_SLACK_TIMEOUT_MS: u64 = 10_000;
const VERBOSE_VERBOSITY: &str = "vvvv";

#[derive(Debug, Deserialize, Clone)]
pub struct LongshotConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub default: DefaultConfig,
    pub ansible: AnsibleConfig,
    /// Extra environment handed to every spawned playbook process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub listeners: BTreeMap<String, ListenerEntry>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or(DEFAULT_HOST),
            self.port.unwrap_or(DEFAULT_PORT)
        )
    }

    /// Path the webhook endpoint is mounted on, always with a leading slash.
    pub fn webhook_path(&self) -> String {
        let path = self.path.as_deref().unwrap_or(DEFAULT_WEBHOOK_PATH);
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DefaultConfig {
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnsibleConfig {
    pub project_dir: Option<PathBuf>,
    pub playbook_dir: Option<PathBuf>,
    pub inventory_dir: Option<PathBuf>,
    pub bootstrap_playbook: String,
    pub verbosity: Option<String>,
    pub command: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl AnsibleConfig {
    fn project_dir(&self) -> PathBuf {
        self.project_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROJECT_DIR))
    }

    /// Directory playbooks are run from, resolved against `project_dir`.
    pub fn playbook_dir(&self) -> PathBuf {
        let dir = self
            .playbook_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAYBOOK_DIR));
        self.project_dir().join(dir)
    }

    pub fn inventory_dir(&self) -> PathBuf {
        let dir = self
            .inventory_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INVENTORY_DIR));
        self.project_dir().join(dir)
    }

    /// Inventory for a listener. Without a name the whole inventory directory is used.
    pub fn inventory_path(&self, inventory_name: Option<&str>) -> PathBuf {
        match inventory_name {
            Some(name) => self.inventory_dir().join(name),
            None => self.inventory_dir(),
        }
    }

    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_ANSIBLE_COMMAND)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Explicit verbosity wins; otherwise verbose mode turns on `-vvvv`.
    pub fn verbosity(&self, verbose: bool) -> Option<String> {
        match self.verbosity.as_deref().map(|v| v.trim_start_matches('-')) {
            Some(v) if !v.is_empty() => Some(v.to_string()),
            _ if verbose => Some(VERBOSE_VERBOSITY.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
    pub username: Option<String>,
    pub icon_url: Option<String>,
    pub forward_stderr: Option<bool>,
    pub forward_stdout: Option<bool>,
    pub request_timeout_ms: Option<u64>,
}

impl SlackConfig {
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_SLACK_USERNAME)
    }

    pub fn forwards_stderr(&self) -> bool {
        self.forward_stderr.unwrap_or(true)
    }

    pub fn forwards_stdout(&self) -> bool {
        self.forward_stdout.unwrap_or(false)
    }

    /// Upper bound for one webhook POST, connect through response.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.request_timeout_ms
                .unwrap_or(DEFAULT_SLACK_TIMEOUT_MS)
                .max(1),
        )
    }
}

/// A listener exactly as written in the config file. Every field is optional
/// here; `ListenerRegistry` applies defaults and rejects incomplete entries.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ListenerEntry {
    pub event: Option<String>,
    pub repo_name: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub playbook_name: Option<String>,
    pub inventory_name: Option<String>,
    pub host_limit: Option<String>,
    pub tags: Option<String>,
    pub skip_tags: Option<String>,
}

impl LongshotConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LongshotConfig = toml::from_str(content)?;
        if config.ansible.bootstrap_playbook.trim().is_empty() {
            return Err(LongshotError::ConfigError(
                "ansible.bootstrap_playbook must not be empty".to_string(),
            ));
        }
        Ok(config)
    }

    /// Verbosity flag applied to every playbook run.
    pub fn verbosity(&self) -> Option<String> {
        self.ansible.verbosity(self.default.verbose)
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<LongshotConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        LongshotError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    LongshotConfig::from_toml_str(&config_str).map_err(|e| match e {
        LongshotError::TomlParseError(err) => LongshotError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            err
        )),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
port = 9000
path = "hooks"

[default]
verbose = true

[ansible]
project_dir = "/srv/deploy"
bootstrap_playbook = "bootstrap.yml"

[env]
ANSIBLE_HOST_KEY_CHECKING = "False"

[slack]
webhook_url = "https://hooks.slack.test/T000"

[listeners.web]
event = "push"
repo_name = "acme/app"
ref = "refs/heads/main"
playbook_name = "deploy.yml"
inventory_name = "production"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = LongshotConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.server.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.server.webhook_path(), "/hooks");
        assert_eq!(config.slack.username(), "Longshot");
        assert!(config.slack.forwards_stderr());
        assert!(!config.slack.forwards_stdout());
        assert_eq!(config.slack.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.ansible.command(), "ansible-playbook");
        assert_eq!(config.ansible.timeout(), Duration::from_secs(3600));
        assert_eq!(
            config.ansible.playbook_dir(),
            PathBuf::from("/srv/deploy/./ansible/")
        );
        assert_eq!(
            config.ansible.inventory_path(Some("production")),
            PathBuf::from("/srv/deploy/./ansible/inventory/production")
        );
        assert_eq!(
            config.env.get("ANSIBLE_HOST_KEY_CHECKING").map(String::as_str),
            Some("False")
        );

        let web = &config.listeners["web"];
        assert_eq!(web.git_ref.as_deref(), Some("refs/heads/main"));
        assert_eq!(web.host_limit, None);
    }

    #[test]
    fn verbose_mode_defaults_to_four_vs() {
        let config = LongshotConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.verbosity().as_deref(), Some("vvvv"));

        let mut quiet = config.clone();
        quiet.default.verbose = false;
        assert_eq!(quiet.verbosity(), None);

        quiet.ansible.verbosity = Some("-vv".to_string());
        assert_eq!(quiet.verbosity().as_deref(), Some("vv"));
    }

    #[test]
    fn missing_ansible_section_is_rejected() {
        let err = LongshotConfig::from_toml_str("[server]\nport = 1\n").unwrap_err();
        assert!(matches!(err, LongshotError::TomlParseError(_)));
    }

    #[test]
    fn empty_bootstrap_playbook_is_rejected() {
        let err =
            LongshotConfig::from_toml_str("[ansible]\nbootstrap_playbook = \" \"\n").unwrap_err();
        assert!(matches!(err, LongshotError::ConfigError(_)));
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listeners.len(), 1);
    }

    #[test]
    fn load_config_reports_path_on_parse_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not = [valid").unwrap();

        match load_config(file.path()) {
            Err(LongshotError::ConfigError(msg)) => assert!(msg.contains("Failed to parse")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
