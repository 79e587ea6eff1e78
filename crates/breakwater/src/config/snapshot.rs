// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use dashmap::DashMap;

use crate::command_key::CommandKey;
use crate::config::{BreakerConfig, CommandModel};

/// The configuration currently known for each command key.
///
/// Reads are plain map lookups and never wait on the configuration store. Entries are replaced
/// whole, so a reader sees either the previous or the new model of a key and never a mix.
#[derive(Debug, Default)]
pub struct ConfigSnapshot {
    models: DashMap<CommandKey, Arc<CommandModel>>,
}

impl ConfigSnapshot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the breaker parameters configured for `key`.
    ///
    /// `None` means the key is unconfigured and defaults apply.
    #[must_use]
    pub fn lookup(&self, key: &CommandKey) -> Option<Arc<BreakerConfig>> {
        self.models.get(key).map(|model| Arc::clone(&model.config))
    }

    /// Returns the full model configured for `key`.
    #[must_use]
    pub fn lookup_model(&self, key: &CommandKey) -> Option<Arc<CommandModel>> {
        self.models.get(key).map(|model| Arc::clone(model.value()))
    }

    /// Number of configured keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns `true` when no key has a loaded model.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub(crate) fn store(&self, key: CommandKey, model: Arc<CommandModel>) {
        self.models.insert(key, model);
    }

    pub(crate) fn remove(&self, key: &CommandKey) -> Option<Arc<CommandModel>> {
        self.models.remove(key).map(|(_, model)| model)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn key(method: &str) -> CommandKey {
        CommandKey::derive("Svc", method, ["String"])
    }

    #[test]
    fn lookup_missing_key_is_none() {
        let snapshot = ConfigSnapshot::new();

        assert!(snapshot.lookup(&key("a")).is_none());
        assert!(snapshot.lookup_model(&key("a")).is_none());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn store_replaces_whole_model() {
        let snapshot = ConfigSnapshot::new();
        let first = Arc::new(CommandModel::from_json(r#"{"enable": 1}"#).unwrap());
        let second = Arc::new(
            CommandModel::from_json(r#"{"enable": 1, "breakerConfig": {"requestVolumeThreshold": 3}}"#).unwrap(),
        );

        snapshot.store(key("a"), Arc::clone(&first));
        let before = snapshot.lookup(&key("a")).unwrap();

        snapshot.store(key("a"), Arc::clone(&second));

        assert_eq!(before.request_volume_threshold, 50);
        assert_eq!(snapshot.lookup(&key("a")).unwrap().request_volume_threshold, 3);
        assert!(Arc::ptr_eq(&snapshot.lookup_model(&key("a")).unwrap(), &second));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn remove_drops_entry() {
        let snapshot = ConfigSnapshot::new();
        snapshot.store(key("a"), Arc::new(CommandModel::default()));

        assert!(snapshot.remove(&key("a")).is_some());
        assert!(snapshot.remove(&key("a")).is_none());
        assert!(snapshot.lookup(&key("a")).is_none());
    }
}
