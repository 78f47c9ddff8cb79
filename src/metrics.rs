// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics exported on `/metrics`.
//!
//! Metric names are a wire contract relied upon by dashboards and alerts.
//! Per-environment counters carry an `env` label.

use crate::error::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

const PREFIX: &str = "configmap_reload";

pub struct ControllerMetrics {
    /// Deployment restarts triggered by ConfigMap changes
    pub restarts_total: IntCounterVec,
    /// Deployment restart patch errors
    pub errors_total: IntCounterVec,
    /// ConfigMap changes deferred into the debounce window
    pub debounced_total: IntCounterVec,
    pub watch_errors_total: IntCounter,
    /// Watch streams opened after the first one
    pub watch_reconnects_total: IntCounter,
    pub pending_restarts: IntGauge,
    /// Retries scheduled after failed restarts
    pub retry_total: IntCounterVec,
    /// Pending restarts that still failed during the shutdown flush
    pub dropped_restarts_total: IntCounter,
    pub leader_state: IntGauge,
    pub leader_transitions_total: IntCounterVec,
    pub leader_acquire_latency_seconds: Histogram,
    pub build_info: IntGaugeVec,
}

impl ControllerMetrics {
    /// Create every controller metric and register it on `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            restarts_total: IntCounterVec::new(
                opts("restarts_total", "Total deployment restarts triggered by ConfigMap changes"),
                &["env"],
            )?,
            errors_total: IntCounterVec::new(
                opts("errors_total", "Total deployment restart errors"),
                &["env"],
            )?,
            debounced_total: IntCounterVec::new(
                opts("debounced_total", "Total ConfigMap events suppressed by debounce"),
                &["env"],
            )?,
            watch_errors_total: IntCounter::with_opts(opts(
                "watch_errors_total",
                "Total Kubernetes watch errors",
            ))?,
            watch_reconnects_total: IntCounter::with_opts(opts(
                "watch_reconnects_total",
                "Total watch stream reconnects after the initial connection",
            ))?,
            pending_restarts: IntGauge::with_opts(opts(
                "pending_restarts",
                "Current number of debounced restarts waiting to be processed",
            ))?,
            retry_total: IntCounterVec::new(
                opts(
                    "retry_total",
                    "Total restart retry attempts scheduled after failed patch operations",
                ),
                &["env"],
            )?,
            dropped_restarts_total: IntCounter::with_opts(opts(
                "dropped_restarts_total",
                "Total pending restarts dropped on shutdown",
            ))?,
            leader_state: IntGauge::with_opts(opts(
                "leader_state",
                "Whether this controller replica is currently leader (1=yes, 0=no)",
            ))?,
            leader_transitions_total: IntCounterVec::new(
                opts("leader_transitions_total", "Total leadership state transitions"),
                &["transition"],
            )?,
            leader_acquire_latency_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    format!("{}_leader_acquire_latency_seconds", PREFIX),
                    "Seconds spent waiting to acquire leadership",
                )
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
            )?,
            build_info: IntGaugeVec::new(
                opts("build_info", "Build information for the controller"),
                &["version", "revision"],
            )?,
        };

        registry.register(Box::new(metrics.restarts_total.clone()))?;
        registry.register(Box::new(metrics.errors_total.clone()))?;
        registry.register(Box::new(metrics.debounced_total.clone()))?;
        registry.register(Box::new(metrics.watch_errors_total.clone()))?;
        registry.register(Box::new(metrics.watch_reconnects_total.clone()))?;
        registry.register(Box::new(metrics.pending_restarts.clone()))?;
        registry.register(Box::new(metrics.retry_total.clone()))?;
        registry.register(Box::new(metrics.dropped_restarts_total.clone()))?;
        registry.register(Box::new(metrics.leader_state.clone()))?;
        registry.register(Box::new(metrics.leader_transitions_total.clone()))?;
        registry.register(Box::new(metrics.leader_acquire_latency_seconds.clone()))?;
        registry.register(Box::new(metrics.build_info.clone()))?;

        Ok(metrics)
    }

    /// Metrics registered on a throwaway registry, for components under test
    pub fn unregistered() -> Result<Self> {
        Self::register(&Registry::new())
    }

    pub fn set_build_info(&self, version: &str, revision: &str) {
        self.build_info
            .with_label_values(&[version, revision])
            .set(1);
    }

    pub fn record_restarts(&self, env: &str, restarted: u64, failed: u64) {
        self.restarts_total.with_label_values(&[env]).inc_by(restarted);
        self.errors_total.with_label_values(&[env]).inc_by(failed);
    }

    pub fn record_leader_transition(&self, transition: &str) {
        self.leader_transitions_total
            .with_label_values(&[transition])
            .inc();
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(format!("{}_{}", PREFIX, name), help)
}

/// Export the registry in Prometheus text format
pub fn export(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
