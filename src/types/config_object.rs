// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::labels;
use crate::types::selector::LabelSelector;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a watched configuration object: `(environment, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigKey {
    pub environment: String,
    pub name: String,
}

impl ConfigKey {
    pub fn new(environment: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.environment, self.name)
    }
}

/// A ConfigMap as seen by the reload engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigObject {
    pub key: ConfigKey,
    pub data: BTreeMap<String, String>,
    pub resource_version: Option<String>,
}

impl ConfigObject {
    pub fn new(key: ConfigKey, data: BTreeMap<String, String>) -> Self {
        Self {
            key,
            data,
            resource_version: None,
        }
    }

    /// Convert a ConfigMap, skipping objects outside the selector or without an `env` label
    pub fn from_config_map(config_map: &ConfigMap, selector: &LabelSelector) -> Option<Self> {
        let object_labels = config_map.labels();
        if !selector.matches(object_labels) {
            return None;
        }

        let environment = object_labels
            .get(labels::ENVIRONMENT)
            .filter(|env| !env.is_empty())?;
        let name = config_map.metadata.name.as_ref().filter(|n| !n.is_empty())?;

        Some(Self {
            key: ConfigKey::new(environment.as_str(), name.as_str()),
            data: config_map.data.clone().unwrap_or_default(),
            resource_version: config_map.resource_version(),
        })
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.data)
    }
}

/// SHA-256 hex digest of `data`.
///
/// The payload is compact JSON with sorted keys, so the order in which the API
/// server returns keys never changes the hash. Everything outside printable
/// ASCII is written as `\uXXXX` (UTF-16 units), which keeps hashes stable
/// against the `config-hash-*` annotations already present on Deployments.
pub fn content_hash(data: &BTreeMap<String, String>) -> String {
    let payload = escape_non_ascii(&serde_json::json!(data).to_string());
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// serde_json leaves non-ASCII and DEL unescaped, and those only occur inside strings
fn escape_non_ascii(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c < '\u{7f}' {
            escaped.push(c);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in c.encode_utf16(&mut units) {
            escaped.push_str(&format!("\\u{:04x}", unit));
        }
    }
    escaped
}

/// A full listing plus the cursor to resume watching from
#[derive(Debug, Clone, Default)]
pub struct ConfigListing {
    pub objects: Vec<ConfigObject>,
    pub resource_version: Option<String>,
}

/// A single change delivered by the watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(ConfigObject),
    Modified(ConfigObject),
    Deleted(ConfigObject),
    /// Cursor-only progress: bookmarks and objects outside the selector contract
    Bookmark { resource_version: String },
}

impl WatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "ADDED",
            WatchEvent::Modified(_) => "MODIFIED",
            WatchEvent::Deleted(_) => "DELETED",
            WatchEvent::Bookmark { .. } => "BOOKMARK",
        }
    }

    pub fn object(&self) -> Option<&ConfigObject> {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => Some(o),
            WatchEvent::Bookmark { .. } => None,
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        match self {
            WatchEvent::Bookmark { resource_version } => Some(resource_version),
            other => other.object().and_then(|o| o.resource_version.as_deref()),
        }
    }
}
