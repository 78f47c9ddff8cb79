// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{annotations, defaults};
use crate::types::LabelSelector;
use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding the ConfigMaps and Deployments
    pub namespace: String,
    /// Selector matching both the watched ConfigMaps and their Deployments
    pub app_selector: LabelSelector,
    /// Pod template annotation written with the restart timestamp
    pub rollout_annotation_key: String,
    pub debounce_window: Duration,
    pub health_port: u16,
    pub leader_election: LeaderElectionConfig,
    pub version: String,
    pub revision: String,
}

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    pub lease_name: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    /// How long a leadership handoff waits for the watch loop to flush and stop
    pub controller_stop_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, validating every value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE").unwrap_or_else(|| defaults::NAMESPACE.to_string());
        if namespace.trim().is_empty() {
            bail!("WATCH_NAMESPACE must be a non-empty string");
        }

        let raw_selector =
            lookup("APP_SELECTOR").unwrap_or_else(|| defaults::APP_SELECTOR.to_string());
        let app_selector = LabelSelector::parse(&raw_selector).context("APP_SELECTOR is invalid")?;

        let rollout_annotation_key = lookup("ROLLOUT_ANNOTATION_KEY")
            .unwrap_or_else(|| annotations::DEFAULT_RESTART_KEY.to_string());
        if rollout_annotation_key.trim().is_empty() {
            bail!("ROLLOUT_ANNOTATION_KEY must be a non-empty string");
        }

        let debounce_seconds = env_u64(&lookup, "DEBOUNCE_SECONDS", defaults::DEBOUNCE_SECONDS, 0)?;
        let health_port = env_u64(&lookup, "HEALTH_PORT", u64::from(defaults::HEALTH_PORT), 1)?;
        let health_port = u16::try_from(health_port)
            .with_context(|| format!("HEALTH_PORT must be <= 65535, got: {}", health_port))?;

        let leader_election = LeaderElectionConfig::from_lookup(&lookup)?;

        Ok(Config {
            namespace: namespace.trim().to_string(),
            app_selector,
            rollout_annotation_key,
            debounce_window: Duration::from_secs(debounce_seconds),
            health_port,
            leader_election,
            version: lookup("APP_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            revision: lookup("GIT_SHA").unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

impl LeaderElectionConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup("LEADER_ELECTION_ENABLED")
            .map(|raw| parse_bool(&raw))
            .unwrap_or(true);

        let lease_name = lookup("LEADER_ELECTION_LEASE_NAME")
            .unwrap_or_else(|| defaults::LEASE_NAME.to_string());
        if lease_name.trim().is_empty() {
            bail!("LEADER_ELECTION_LEASE_NAME must be a non-empty string");
        }

        // In Kubernetes HOSTNAME is the pod name, a stable per-replica identity
        let identity = lookup("LEADER_ELECTION_IDENTITY")
            .or_else(|| lookup("HOSTNAME"))
            .or_else(|| lookup("POD_NAME"))
            .unwrap_or_else(|| "unknown".to_string());

        let lease_duration = env_u64(
            lookup,
            "LEADER_ELECTION_LEASE_DURATION_SECONDS",
            defaults::LEASE_DURATION_SECS,
            1,
        )?;
        let renew_deadline = env_u64(
            lookup,
            "LEADER_ELECTION_RENEW_DEADLINE_SECONDS",
            defaults::RENEW_DEADLINE_SECS,
            1,
        )?;
        let retry_period = env_u64(
            lookup,
            "LEADER_ELECTION_RETRY_PERIOD_SECONDS",
            defaults::RETRY_PERIOD_SECS,
            1,
        )?;
        let stop_timeout = env_u64(
            lookup,
            "LEADER_ELECTION_CONTROLLER_STOP_TIMEOUT_SECONDS",
            defaults::CONTROLLER_STOP_TIMEOUT_SECS,
            1,
        )?;

        if renew_deadline >= lease_duration {
            bail!(
                "LEADER_ELECTION_RENEW_DEADLINE_SECONDS must be smaller than \
                 LEADER_ELECTION_LEASE_DURATION_SECONDS"
            );
        }
        if retry_period >= renew_deadline {
            bail!(
                "LEADER_ELECTION_RETRY_PERIOD_SECONDS must be smaller than \
                 LEADER_ELECTION_RENEW_DEADLINE_SECONDS"
            );
        }

        Ok(Self {
            enabled,
            lease_name,
            identity,
            lease_duration: Duration::from_secs(lease_duration),
            renew_deadline: Duration::from_secs(renew_deadline),
            retry_period: Duration::from_secs(retry_period),
            controller_stop_timeout: Duration::from_secs(stop_timeout),
        })
    }
}

fn env_u64<F>(lookup: &F, name: &str, default: u64, minimum: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };

    let parsed = raw
        .trim()
        .parse::<i64>()
        .with_context(|| format!("{} must be an integer, got: {:?}", name, raw))?;

    u64::try_from(parsed)
        .ok()
        .filter(|v| *v >= minimum)
        .with_context(|| format!("{} must be >= {}, got: {}", name, minimum, parsed))
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
