// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! kube-rs implementation of the cluster operations

use crate::constants::{watch, OPERATOR_NAME};
use crate::error::{ControllerError, Result};
use crate::kubernetes::ops::{ClusterOps, WatchStream};
use crate::types::{ConfigListing, ConfigObject, LabelSelector, TargetWorkload, WatchEvent};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{ListParams, Patch, PatchParams, WatchEvent as KubeWatchEvent, WatchParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

pub struct KubeClusterOps {
    client: Client,
    namespace: String,
    selector: LabelSelector,
}

impl KubeClusterOps {
    pub fn new(client: Client, namespace: impl Into<String>, selector: LabelSelector) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            selector,
        }
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    #[instrument(skip(self), fields(namespace = %self.namespace, selector = %self.selector))]
    async fn list_config_objects(&self) -> Result<ConfigListing> {
        let lp = ListParams::default().labels(self.selector.as_str());
        let list = self.config_maps().list(&lp).await?;

        let objects = list
            .items
            .iter()
            .filter_map(|cm| {
                let object = ConfigObject::from_config_map(cm, &self.selector);
                if object.is_none() {
                    debug!("Skipping ConfigMap {} without env label", cm.name_any());
                }
                object
            })
            .collect();

        Ok(ConfigListing {
            objects,
            resource_version: list.metadata.resource_version,
        })
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn watch_config_objects(&self, from_version: &str) -> Result<WatchStream> {
        let wp = WatchParams::default()
            .labels(self.selector.as_str())
            .timeout(watch::STREAM_TIMEOUT_SECS);
        let selector = self.selector.clone();

        let stream = self.config_maps().watch(&wp, from_version).await?;
        Ok(stream
            .map(move |event| convert_watch_event(event, &selector))
            .boxed())
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn list_workloads(&self, environment: &str) -> Result<Vec<TargetWorkload>> {
        let selector = self.selector.for_environment(environment);
        let lp = ListParams::default().labels(&selector);
        let list = self.deployments().list(&lp).await?;

        Ok(list
            .items
            .iter()
            .filter_map(|d| {
                let workload = TargetWorkload::from_deployment(d);
                if workload.is_none() {
                    warn!("Encountered deployment without metadata.name in env {}", environment);
                }
                workload
            })
            .collect())
    }

    #[instrument(skip(self, annotations), fields(namespace = %self.namespace))]
    async fn patch_workload_annotations(
        &self,
        workload: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        // Same mechanism as `kubectl rollout restart`: a pod template change rolls new pods
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": annotations
                    }
                }
            }
        });
        let pp = PatchParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        };

        self.deployments()
            .patch(workload, &pp, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Map a raw watch event onto the engine's event type.
///
/// Server-side `ERROR` events become API errors so a compacted cursor (410) or
/// an RBAC denial is classified exactly like a failed request.
fn convert_watch_event(
    event: kube::Result<KubeWatchEvent<ConfigMap>>,
    selector: &LabelSelector,
) -> Result<WatchEvent> {
    let wrap = |cm: ConfigMap, make: fn(ConfigObject) -> WatchEvent| {
        match ConfigObject::from_config_map(&cm, selector) {
            Some(object) => make(object),
            None => WatchEvent::Bookmark {
                resource_version: cm.resource_version().unwrap_or_default(),
            },
        }
    };

    match event? {
        KubeWatchEvent::Added(cm) => Ok(wrap(cm, WatchEvent::Added)),
        KubeWatchEvent::Modified(cm) => Ok(wrap(cm, WatchEvent::Modified)),
        KubeWatchEvent::Deleted(cm) => Ok(wrap(cm, WatchEvent::Deleted)),
        KubeWatchEvent::Bookmark(bookmark) => Ok(WatchEvent::Bookmark {
            resource_version: bookmark.metadata.resource_version,
        }),
        KubeWatchEvent::Error(response) => {
            Err(ControllerError::KubeError(kube::Error::Api(response)))
        }
    }
}
