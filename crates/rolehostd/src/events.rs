//! Settings and topology change notifications.

use std::collections::BTreeSet;
use std::io;
use std::sync::Weak;

use thiserror::Error;

use rolehost_config::settings::{SettingsDocument, is_recognised_setting};

/// A named setting whose value changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingChange {
    /// Setting name.
    pub name: String,
    /// Previous value, if the setting existed.
    pub old_value: Option<String>,
    /// New value, if the setting still exists.
    pub new_value: Option<String>,
}

impl SettingChange {
    /// Returns `true` when the worker configuration depends on this setting.
    #[must_use]
    pub fn is_relevant(&self) -> bool {
        is_recognised_setting(&self.name)
    }
}

/// A role whose instance count changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyChange {
    /// Role name.
    pub role: String,
    /// Previous instance count, if the role existed.
    pub old_instances: Option<u32>,
    /// New instance count, if the role still exists.
    pub new_instances: Option<u32>,
}

/// A batch of changes delivered by the hosting platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeEvent {
    settings: Vec<SettingChange>,
    topology: Vec<TopologyChange>,
}

impl ChangeEvent {
    /// Builds an empty event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a setting change.
    #[must_use]
    pub fn with_setting(
        mut self,
        name: impl Into<String>,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Self {
        self.settings.push(SettingChange {
            name: name.into(),
            old_value: old_value.map(str::to_owned),
            new_value: new_value.map(str::to_owned),
        });
        self
    }

    /// Adds a topology change.
    #[must_use]
    pub fn with_topology(
        mut self,
        role: impl Into<String>,
        old_instances: Option<u32>,
        new_instances: Option<u32>,
    ) -> Self {
        self.topology.push(TopologyChange {
            role: role.into(),
            old_instances,
            new_instances,
        });
        self
    }

    /// Diffs two settings documents.
    #[must_use]
    pub fn between(previous: &SettingsDocument, current: &SettingsDocument) -> Self {
        let mut event = Self::new();

        let names: BTreeSet<&str> = previous
            .settings
            .iter()
            .chain(current.settings.iter())
            .map(|(name, _)| name)
            .collect();
        for name in names {
            let old_value = previous.settings.get(name);
            let new_value = current.settings.get(name);
            if old_value != new_value {
                event = event.with_setting(name, old_value, new_value);
            }
        }

        let roles: BTreeSet<&String> = previous
            .topology
            .keys()
            .chain(current.topology.keys())
            .collect();
        for role in roles {
            let old_instances = previous.topology.get(role).copied();
            let new_instances = current.topology.get(role).copied();
            if old_instances != new_instances {
                event = event.with_topology(role.as_str(), old_instances, new_instances);
            }
        }
        event
    }

    /// All setting changes.
    #[must_use]
    pub fn settings(&self) -> &[SettingChange] {
        &self.settings
    }

    /// All topology changes.
    #[must_use]
    pub fn topology(&self) -> &[TopologyChange] {
        &self.topology
    }

    /// Setting changes the worker configuration depends on.
    pub fn relevant_settings(&self) -> impl Iterator<Item = &SettingChange> {
        self.settings.iter().filter(|change| change.is_relevant())
    }

    /// Returns `true` when the event carries no change at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty() && self.topology.is_empty()
    }
}

/// Receives change events. Called from the feed's delivery thread.
pub trait ChangeListener: Send + Sync {
    /// Handles one change event.
    fn notify(&self, event: &ChangeEvent);
}

/// Errors raised while subscribing to a change feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed already delivers to a listener.
    #[error("change feed already has a subscriber")]
    AlreadySubscribed,
    /// The delivery thread could not be spawned.
    #[error("failed to spawn change delivery thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Source of change notifications.
///
/// Listeners are held weakly: once the listener is dropped the feed stops
/// delivering.
pub trait ChangeFeed: Send + Sync {
    /// Registers `listener` for future events.
    fn subscribe(&self, listener: Weak<dyn ChangeListener>) -> Result<(), FeedError>;
}

/// Feed that never delivers, used when the host has no settings document.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChangeFeed;

impl ChangeFeed for NoChangeFeed {
    fn subscribe(&self, listener: Weak<dyn ChangeListener>) -> Result<(), FeedError> {
        drop(listener);
        Ok(())
    }
}
