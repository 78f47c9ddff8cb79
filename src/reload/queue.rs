// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Debounce, coalescing and per-key retry state over monotonic time.
//!
//! An entry stays queued from the first meaningful change until a restart for its
//! current target hash succeeds. Failed restarts stay in place with a retry delay;
//! a fresher change replaces the target and clears the retry state.

use crate::constants::watch;
use crate::reload::backoff::RetryBackoff;
use crate::types::ConfigKey;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    target_hash: String,
    due_at: Instant,
    retry_attempt: u32,
    retry_not_before: Option<Instant>,
}

impl Entry {
    fn ready_at(&self) -> Instant {
        match self.retry_not_before {
            Some(not_before) => self.due_at.max(not_before),
            None => self.due_at,
        }
    }
}

/// How a meaningful change was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Debounce window is zero; the restart is due right away
    Immediate,
    Debounced { due_at: Instant },
}

/// A restart ready to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRestart {
    pub key: ConfigKey,
    pub target_hash: String,
    pub retry_attempt: u32,
}

#[derive(Debug)]
pub struct PendingRestartQueue {
    window: Duration,
    backoff: RetryBackoff,
    idle_timeout: Duration,
    entries: BTreeMap<ConfigKey, Entry>,
    /// Completion time of the last successful restart per key
    last_restart: HashMap<ConfigKey, Instant>,
}

impl PendingRestartQueue {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            backoff: RetryBackoff::default(),
            idle_timeout: Duration::from_secs(watch::IDLE_TIMEOUT_SECS),
            entries: BTreeMap::new(),
            last_restart: HashMap::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time left in the window for `key`: the full window, or its residual when a
    /// restart for the key completed less than a window ago
    fn remaining(&self, key: &ConfigKey, now: Instant) -> Duration {
        match self.last_restart.get(key) {
            Some(last) => {
                let elapsed = now.saturating_duration_since(*last);
                if elapsed < self.window {
                    self.window - elapsed
                } else {
                    self.window
                }
            }
            None => self.window,
        }
    }

    /// Schedule (or reschedule) a restart of `key` towards `hash`
    pub fn on_meaningful_change(&mut self, key: ConfigKey, hash: String, now: Instant) -> Schedule {
        if self.window.is_zero() {
            self.upsert(key, hash, now);
            return Schedule::Immediate;
        }

        let candidate = now + self.remaining(&key, now);
        let due_at = self.upsert(key, hash, candidate);
        Schedule::Debounced { due_at }
    }

    /// Schedule a restart that bypasses the debounce window
    pub fn schedule_immediate(&mut self, key: ConfigKey, hash: String, now: Instant) {
        self.upsert(key, hash, now);
    }

    fn upsert(&mut self, key: ConfigKey, hash: String, candidate: Instant) -> Instant {
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            target_hash: String::new(),
            due_at: candidate,
            retry_attempt: 0,
            retry_not_before: None,
        });
        entry.target_hash = hash;
        entry.due_at = entry.due_at.max(candidate);
        entry.retry_attempt = 0;
        entry.retry_not_before = None;
        entry.due_at
    }

    /// Time until the earliest entry becomes due, or the idle timeout
    pub fn next_wake_delay(&self, now: Instant) -> Duration {
        self.entries
            .values()
            .map(|e| e.ready_at().saturating_duration_since(now))
            .min()
            .unwrap_or(self.idle_timeout)
    }

    /// Entries whose due time and retry delay have both passed.
    ///
    /// Entries are not removed; report the result via `mark_succeeded`/`mark_failed`.
    pub fn drain_due(&self, now: Instant) -> Vec<DueRestart> {
        self.entries
            .iter()
            .filter(|(_, e)| e.ready_at() <= now)
            .map(|(key, e)| DueRestart {
                key: key.clone(),
                target_hash: e.target_hash.clone(),
                retry_attempt: e.retry_attempt,
            })
            .collect()
    }

    /// Remove and return every entry regardless of its due time
    pub fn force_drain_all(&mut self) -> Vec<DueRestart> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(key, e)| DueRestart {
                key,
                target_hash: e.target_hash,
                retry_attempt: e.retry_attempt,
            })
            .collect()
    }

    /// Clear the entry if it still targets `hash`. Returns whether it was removed.
    pub fn mark_succeeded(&mut self, key: &ConfigKey, hash: &str, now: Instant) -> bool {
        self.last_restart.insert(key.clone(), now);
        match self.entries.get(key) {
            Some(entry) if entry.target_hash == hash => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Schedule a retry for the entry if it still targets `hash`, returning the delay
    pub fn mark_failed(&mut self, key: &ConfigKey, hash: &str, now: Instant) -> Option<Duration> {
        let entry = self.entries.get_mut(key).filter(|e| e.target_hash == hash)?;
        entry.retry_attempt += 1;
        let delay = self.backoff.delay(entry.retry_attempt);
        entry.retry_not_before = Some(now + delay);
        Some(delay)
    }

    pub fn pending_hash(&self, key: &ConfigKey) -> Option<&str> {
        self.entries.get(key).map(|e| e.target_hash.as_str())
    }

    pub fn due_at(&self, key: &ConfigKey) -> Option<Instant> {
        self.entries.get(key).map(|e| e.due_at)
    }

    pub fn retry_state(&self, key: &ConfigKey) -> Option<(u32, Option<Instant>)> {
        self.entries
            .get(key)
            .map(|e| (e.retry_attempt, e.retry_not_before))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
