//! Listener registry: defaulted listener specs and their match patterns.

use std::collections::BTreeMap;

use crate::config::ListenerEntry;
use crate::error::{LongshotError, Result};
use crate::webhook::WebhookEvent;

/// Value that matches any event field.
pub const WILDCARD: &str = "*";

const PATTERN_DELIMITER: &str = ":";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub event: String,
    pub repo_name: String,
    pub git_ref: String,
    pub playbook_name: String,
    pub inventory_name: Option<String>,
    pub host_limit: Option<String>,
    pub tags: Option<String>,
    pub skip_tags: Option<String>,
}

impl ListenerSpec {
    /// Apply field-wise defaults to a raw config entry.
    pub fn from_entry(name: &str, entry: &ListenerEntry) -> Result<Self> {
        let playbook_name = non_empty(&entry.playbook_name).ok_or_else(|| {
            LongshotError::ConfigError(format!("Listener '{}' has no playbook_name", name))
        })?;

        Ok(Self {
            event: match_field(&entry.event),
            repo_name: match_field(&entry.repo_name),
            git_ref: match_field(&entry.git_ref),
            playbook_name,
            inventory_name: non_empty(&entry.inventory_name),
            host_limit: non_empty(&entry.host_limit),
            tags: non_empty(&entry.tags),
            skip_tags: non_empty(&entry.skip_tags),
        })
    }
}

fn match_field(value: &Option<String>) -> String {
    non_empty(value).unwrap_or_else(|| WILDCARD.to_string())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// The non-wildcard `event`, `repo`, `ref` selectors of a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    event: Option<String>,
    repo_name: Option<String>,
    git_ref: Option<String>,
}

impl MatchPattern {
    pub fn derive(spec: &ListenerSpec) -> Self {
        let selector = |field: &str| (field != WILDCARD).then(|| field.to_string());
        Self {
            event: selector(&spec.event),
            repo_name: selector(&spec.repo_name),
            git_ref: selector(&spec.git_ref),
        }
    }

    /// Every non-wildcard selector must equal the event's field exactly.
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        let field_matches = |selector: &Option<String>, value: &str| {
            selector.as_deref().is_none_or(|expected| expected == value)
        };

        field_matches(&self.event, &event.event_type)
            && field_matches(&self.repo_name, &event.repo_full_name)
            && field_matches(&self.git_ref, &event.git_ref)
    }

    /// Joined form, e.g. `push:acme/app`. Empty when every field is a wildcard.
    pub fn as_key(&self) -> String {
        [&self.event, &self.repo_name, &self.git_ref]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(PATTERN_DELIMITER)
    }
}

impl std::fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

#[derive(Debug, Clone)]
pub struct Listener {
    pub name: String,
    pub spec: ListenerSpec,
    pub pattern: MatchPattern,
}

/// All configured listeners, keyed and ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ListenerRegistry {
    listeners: BTreeMap<String, Listener>,
}

impl ListenerRegistry {
    /// Fails on the first listener that cannot run, so a broken entry never
    /// registers.
    pub fn from_entries(entries: &BTreeMap<String, ListenerEntry>) -> Result<Self> {
        let mut listeners = BTreeMap::new();
        for (name, entry) in entries {
            let spec = ListenerSpec::from_entry(name, entry)?;
            let pattern = MatchPattern::derive(&spec);
            listeners.insert(
                name.clone(),
                Listener {
                    name: name.clone(),
                    spec,
                    pattern,
                },
            );
        }
        Ok(Self { listeners })
    }

    pub fn get(&self, name: &str) -> Option<&Listener> {
        self.listeners.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.values()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listeners triggered by `event`, in name order.
    pub fn matching<'a>(&'a self, event: &'a WebhookEvent) -> impl Iterator<Item = &'a Listener> {
        self.listeners
            .values()
            .filter(move |listener| listener.pattern.matches(event))
    }
}
