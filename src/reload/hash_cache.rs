// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::ConfigKey;
use std::collections::HashMap;

/// Result of comparing an observed content hash against the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No prior entry; the hash became the baseline
    FirstSeen,
    Unchanged,
    Changed,
}

/// Last known content hash per `(environment, name)`.
///
/// Entries are only ever overwritten by `seed` or by `commit` after a successful
/// restart. Deletions never remove entries.
#[derive(Debug, Default)]
pub struct HashCache {
    hashes: HashMap<ConfigKey, String>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a baseline hash without triggering anything
    pub fn seed(&mut self, key: ConfigKey, hash: impl Into<String>) {
        self.hashes.insert(key, hash.into());
    }

    /// Compare `hash` with the stored baseline. Only `FirstSeen` mutates the cache.
    pub fn observe(&mut self, key: &ConfigKey, hash: &str) -> Observation {
        match self.hashes.get(key) {
            None => {
                self.hashes.insert(key.clone(), hash.to_string());
                Observation::FirstSeen
            }
            Some(known) if known == hash => Observation::Unchanged,
            Some(_) => Observation::Changed,
        }
    }

    /// Store the hash a restart has successfully rolled out
    pub fn commit(&mut self, key: ConfigKey, hash: impl Into<String>) {
        self.hashes.insert(key, hash.into());
    }

    pub fn get(&self, key: &ConfigKey) -> Option<&str> {
        self.hashes.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConfigKey {
        ConfigKey::new("test", "cfg")
    }

    #[test]
    fn test_first_observation_seeds_baseline() {
        let mut cache = HashCache::new();
        assert_eq!(cache.observe(&key(), "h1"), Observation::FirstSeen);
        assert_eq!(cache.get(&key()), Some("h1"));
        assert_eq!(cache.observe(&key(), "h1"), Observation::Unchanged);
    }

    #[test]
    fn test_changed_does_not_mutate() {
        let mut cache = HashCache::new();
        cache.seed(key(), "h1");

        assert_eq!(cache.observe(&key(), "h2"), Observation::Changed);
        assert_eq!(cache.get(&key()), Some("h1"));
        assert_eq!(cache.observe(&key(), "h2"), Observation::Changed);
    }

    #[test]
    fn test_commit_makes_hash_unchanged() {
        let mut cache = HashCache::new();
        cache.seed(key(), "h1");
        cache.commit(key(), "h2");

        assert_eq!(cache.observe(&key(), "h2"), Observation::Unchanged);
        assert_eq!(cache.observe(&key(), "h1"), Observation::Changed);
    }

    #[test]
    fn test_keys_are_scoped_by_environment() {
        let mut cache = HashCache::new();
        cache.seed(ConfigKey::new("test", "cfg"), "h1");

        assert_eq!(
            cache.observe(&ConfigKey::new("prod", "cfg"), "h2"),
            Observation::FirstSeen
        );
        assert_eq!(cache.len(), 2);
    }
}
