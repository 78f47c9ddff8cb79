// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::annotations;
use k8s_openapi::api::apps::v1::Deployment;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A Deployment restarted when one of its ConfigMaps changes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetWorkload {
    pub name: String,
    /// Pod template annotations
    pub annotations: BTreeMap<String, String>,
}

impl TargetWorkload {
    pub fn new(name: impl Into<String>, annotations: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            annotations,
        }
    }

    /// Build from a Deployment, returning None when it has no name
    pub fn from_deployment(deployment: &Deployment) -> Option<Self> {
        let name = deployment
            .metadata
            .name
            .as_ref()
            .filter(|n| !n.is_empty())?
            .clone();

        let annotations = deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.annotations.clone())
            .unwrap_or_default();

        Some(Self { name, annotations })
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Annotation key recording the content hash of `config_name` on a pod template.
///
/// Shares the prefix of the restart annotation key (`shipshape.io/restartedAt`
/// gives `shipshape.io/config-hash-<name>`) and keeps the name segment within
/// the 63 character limit, suffixing a digest of the raw name when trimmed.
pub fn config_hash_annotation_key(restart_annotation_key: &str, config_name: &str) -> String {
    let normalized = match normalize_name(config_name) {
        n if n.is_empty() => annotations::CONFIG_HASH_FALLBACK_NAME.to_string(),
        n => n,
    };

    let mut annotation_name = format!("{}{}", annotations::CONFIG_HASH_PREFIX, normalized);
    if annotation_name.len() > annotations::MAX_NAME_LENGTH {
        let digest = hex::encode(Sha256::digest(config_name.as_bytes()));
        let suffix = &digest[..annotations::NAME_DIGEST_LENGTH];
        let max_prefix_length = annotations::MAX_NAME_LENGTH
            .saturating_sub(annotations::CONFIG_HASH_PREFIX.len() + 1 + suffix.len())
            .max(1);
        let trimmed: String = normalized.chars().take(max_prefix_length).collect();
        let trimmed = match trimmed.trim_end_matches(['-', '.']) {
            "" => annotations::CONFIG_HASH_FALLBACK_NAME,
            t => t,
        };
        annotation_name = format!("{}{}-{}", annotations::CONFIG_HASH_PREFIX, trimmed, suffix);
    }

    match restart_annotation_key.split_once('/') {
        Some((prefix, _)) => format!("{}/{}", prefix, annotation_name),
        None => annotation_name,
    }
}

/// Collapse runs of characters outside `[A-Za-z0-9_.-]` into a single `-`
fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out.trim_matches(['-', '.']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use kube::api::ObjectMeta;

    const RESTART_KEY: &str = "shipshape.io/restartedAt";

    #[test]
    fn test_config_hash_key_uses_restart_key_prefix() {
        assert_eq!(
            config_hash_annotation_key(RESTART_KEY, "helloworld-config"),
            "shipshape.io/config-hash-helloworld-config"
        );
    }

    #[test]
    fn test_config_hash_key_without_prefix() {
        assert_eq!(
            config_hash_annotation_key("restartedAt", "cfg"),
            "config-hash-cfg"
        );
    }

    #[test]
    fn test_config_hash_key_normalizes_invalid_characters() {
        assert_eq!(
            config_hash_annotation_key(RESTART_KEY, "my config::v2."),
            "shipshape.io/config-hash-my-config-v2"
        );
    }

    #[test]
    fn test_config_hash_key_falls_back_for_empty_name() {
        assert_eq!(
            config_hash_annotation_key(RESTART_KEY, "::"),
            "shipshape.io/config-hash-configmap"
        );
    }

    #[test]
    fn test_config_hash_key_trims_long_names() {
        let name = "a".repeat(80);
        let key = config_hash_annotation_key(RESTART_KEY, &name);
        let segment = key.strip_prefix("shipshape.io/").unwrap();
        assert_eq!(segment.len(), 63);
        assert!(segment.starts_with("config-hash-aaaa"));

        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        assert!(segment.ends_with(&digest[..10]));
    }

    #[test]
    fn test_config_hash_key_long_names_stay_distinct() {
        let a = config_hash_annotation_key(RESTART_KEY, &format!("{}-one", "x".repeat(70)));
        let b = config_hash_annotation_key(RESTART_KEY, &format!("{}-two", "x".repeat(70)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_deployment_reads_template_annotations() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("helloworld".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        annotations: Some(BTreeMap::from([(
                            RESTART_KEY.to_string(),
                            "2024-01-15T08:30:00Z".to_string(),
                        )])),
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            status: None,
        };

        let workload = TargetWorkload::from_deployment(&deployment).unwrap();
        assert_eq!(workload.name, "helloworld");
        assert_eq!(workload.annotation(RESTART_KEY), Some("2024-01-15T08:30:00Z"));
    }

    #[test]
    fn test_from_deployment_without_name() {
        assert!(TargetWorkload::from_deployment(&Deployment::default()).is_none());
    }
}
