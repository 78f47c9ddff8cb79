// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster operations consumed by the reload engine

use crate::error::Result;
use crate::types::{ConfigListing, TargetWorkload, WatchEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;

pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// List/watch/patch capability, scoped to one namespace and app selector.
///
/// The engine only ever talks to the cluster through this trait, so it can run
/// against kube-rs or an in-memory fake.
#[async_trait]
pub trait ClusterOps: Send + Sync + 'static {
    /// Full listing of the watched ConfigMaps plus the cursor to watch from
    async fn list_config_objects(&self) -> Result<ConfigListing>;

    /// Stream of changes after `from_version`; ends when the server closes it
    async fn watch_config_objects(&self, from_version: &str) -> Result<WatchStream>;

    /// Deployments selected by the app selector and `env=<environment>`
    async fn list_workloads(&self, environment: &str) -> Result<Vec<TargetWorkload>>;

    /// Merge `annotations` into the pod template of `workload`
    async fn patch_workload_annotations(
        &self,
        workload: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()>;
}
