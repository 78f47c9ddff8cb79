// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::labels;
use crate::error::{ControllerError, Result};
use std::collections::BTreeMap;
use std::fmt;

/// An equality-based label selector such as `app=helloworld,tier=web`.
///
/// Only `key=value` and `key==value` clauses are understood; anything else in
/// the raw string (`key!=value`, set-based clauses) is carried through to the
/// API server untouched but ignored for local matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    raw: String,
    clauses: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Parse a selector, requiring at least one `key=value` pair
    pub fn parse(raw: &str) -> Result<Self> {
        let clauses: BTreeMap<String, String> = raw
            .split(',')
            .filter_map(equality_clause)
            .collect();

        if clauses.is_empty() {
            return Err(ControllerError::SelectorError(format!(
                "selector must contain at least one key=value pair, got: {:?}",
                raw
            )));
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            clauses,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check that `labels` carry every key/value pair of this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.clauses
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }

    /// Selector for workloads of a single environment.
    ///
    /// Appends `env=<environment>` unless the selector already pins an
    /// environment, so a change in `test` never restarts `prod` workloads.
    pub fn for_environment(&self, environment: &str) -> String {
        let mut clauses: Vec<String> = self
            .raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();

        let env_prefix = format!("{}=", labels::ENVIRONMENT);
        if !clauses.iter().any(|part| part.starts_with(&env_prefix)) {
            clauses.push(format!("{}{}", env_prefix, environment));
        }
        clauses.join(",")
    }
}

fn equality_clause(part: &str) -> Option<(String, String)> {
    if part.contains("!=") {
        return None;
    }
    let (key, value) = part.split_once("==").or_else(|| part.split_once('='))?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
