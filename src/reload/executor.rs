// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::kubernetes::ClusterOps;
use crate::types::{config_hash_annotation_key, ConfigKey};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Per-key result of one restart attempt across all matching workloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartOutcome {
    pub environment: String,
    pub matched: usize,
    pub restarted: usize,
    /// Workloads already carrying the target hash
    pub skipped: usize,
    pub failed: usize,
}

impl RestartOutcome {
    /// A restart intent is complete only when no workload failed
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Issues rollout-restart patches for a config key
pub struct RestartExecutor {
    ops: Arc<dyn ClusterOps>,
    restart_annotation_key: String,
    clock: fn() -> DateTime<Utc>,
}

impl RestartExecutor {
    pub fn new(ops: Arc<dyn ClusterOps>, restart_annotation_key: impl Into<String>) -> Self {
        Self {
            ops,
            restart_annotation_key: restart_annotation_key.into(),
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Patch every workload of `key.environment` that does not yet carry `target_hash`
    #[instrument(skip_all, fields(key = %key))]
    pub async fn restart(&self, key: &ConfigKey, target_hash: &str) -> RestartOutcome {
        let mut outcome = RestartOutcome {
            environment: key.environment.clone(),
            ..Default::default()
        };

        let workloads = match self.ops.list_workloads(&key.environment).await {
            Ok(workloads) => workloads,
            Err(e) => {
                error!("Failed to list deployments for env {}: {}", key.environment, e);
                outcome.failed = 1;
                return outcome;
            }
        };
        outcome.matched = workloads.len();

        let hash_key = config_hash_annotation_key(&self.restart_annotation_key, &key.name);
        let timestamp = (self.clock)().to_rfc3339_opts(SecondsFormat::Secs, true);
        let annotations = BTreeMap::from([
            (self.restart_annotation_key.clone(), timestamp),
            (hash_key.clone(), target_hash.to_string()),
        ]);

        for workload in &workloads {
            if workload.annotation(&hash_key) == Some(target_hash) {
                debug!(
                    "Deployment {} already has config hash {}, skipping patch",
                    workload.name, target_hash
                );
                outcome.skipped += 1;
                continue;
            }

            match self
                .ops
                .patch_workload_annotations(&workload.name, &annotations)
                .await
            {
                Ok(()) => {
                    info!(
                        "Triggered rolling restart of deployment {} for {}",
                        workload.name, key
                    );
                    outcome.restarted += 1;
                }
                Err(e) => {
                    error!("Failed to restart deployment {}: {}", workload.name, e);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}
