// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Startup drift check: finds ConfigMaps whose workloads still run an older hash.
//!
//! Only workloads with evidence of a previous controller restart are considered.
//! A workload carrying neither the hash annotation nor the restart marker has an
//! unknown baseline and is left alone.

use crate::kubernetes::ClusterOps;
use crate::types::{config_hash_annotation_key, ConfigKey, ConfigObject};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A restart needed to bring the workloads of `key` onto `hash`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftRepair {
    pub key: ConfigKey,
    pub hash: String,
    pub stale_workloads: Vec<String>,
}

pub struct DriftReconciler {
    ops: Arc<dyn ClusterOps>,
    restart_annotation_key: String,
}

impl DriftReconciler {
    pub fn new(ops: Arc<dyn ClusterOps>, restart_annotation_key: impl Into<String>) -> Self {
        Self {
            ops,
            restart_annotation_key: restart_annotation_key.into(),
        }
    }

    /// Compare every listed object with the annotations on its workloads
    #[instrument(skip_all, fields(objects = objects.len()))]
    pub async fn reconcile(&self, objects: &[ConfigObject]) -> Vec<DriftRepair> {
        let mut repairs = Vec::new();

        for object in objects {
            let key = &object.key;
            let workloads = match self.ops.list_workloads(&key.environment).await {
                Ok(workloads) => workloads,
                Err(e) => {
                    warn!("Failed startup drift check for {}: {}", key, e);
                    continue;
                }
            };

            let hash = object.content_hash();
            let hash_key = config_hash_annotation_key(&self.restart_annotation_key, &key.name);
            let mut stale_workloads = Vec::new();
            let mut unknown = 0;

            for workload in &workloads {
                match workload.annotation(&hash_key) {
                    Some(observed) if observed != hash => stale_workloads.push(workload.name.clone()),
                    Some(_) => {}
                    // Restarted by a controller that did not record hashes yet
                    None if workload.annotation(&self.restart_annotation_key).is_some() => {
                        stale_workloads.push(workload.name.clone())
                    }
                    None => unknown += 1,
                }
            }

            if unknown > 0 {
                info!(
                    "Startup drift check skipped for {} deployment(s) in env {} without hash annotation for {}",
                    unknown, key.environment, key.name
                );
            }

            if stale_workloads.is_empty() {
                continue;
            }

            warn!(
                "Detected startup drift for {} (stale deployments: {})",
                key,
                stale_workloads.join(", ")
            );
            repairs.push(DriftRepair {
                key: key.clone(),
                hash,
                stale_workloads,
            });
        }

        repairs
    }
}
