// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Turns raw watch events into meaningful changes or explicit no-ops.

use crate::reload::hash_cache::{HashCache, Observation};
use crate::types::{ConfigKey, WatchEvent};

/// Why an event did not lead to a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// Deletions never restart and never touch the cache
    Deleted,
    /// First time the key was seen; it is now the baseline
    Seeded,
    /// Content hash matches what is live or already scheduled
    Unchanged,
    /// Cursor-only event
    Bookmark,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Suppressed(Suppression),
    Meaningful { key: ConfigKey, hash: String },
}

/// Classify `event` against the cache.
///
/// `pending_hash` is the hash of a restart already queued for the same key. A
/// change matching it adds nothing; a change back to the live hash while a
/// restart is pending is still meaningful, since it supersedes the queued target.
pub fn detect(event: &WatchEvent, cache: &mut HashCache, pending_hash: Option<&str>) -> Detection {
    let object = match event {
        WatchEvent::Bookmark { .. } => return Detection::Suppressed(Suppression::Bookmark),
        WatchEvent::Deleted(_) => return Detection::Suppressed(Suppression::Deleted),
        WatchEvent::Added(object) | WatchEvent::Modified(object) => object,
    };

    let hash = object.content_hash();

    if let Some(pending) = pending_hash {
        if pending == hash {
            return Detection::Suppressed(Suppression::Unchanged);
        }
        return Detection::Meaningful {
            key: object.key.clone(),
            hash,
        };
    }

    match cache.observe(&object.key, &hash) {
        Observation::FirstSeen => Detection::Suppressed(Suppression::Seeded),
        Observation::Unchanged => Detection::Suppressed(Suppression::Unchanged),
        Observation::Changed => Detection::Meaningful {
            key: object.key.clone(),
            hash,
        },
    }
}
