// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use kube::Client;
use prometheus::Registry;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shipshape_controller::config::Config;
use shipshape_controller::health::{self, HealthState};
use shipshape_controller::kubernetes::KubeClusterOps;
use shipshape_controller::leader::{LeaseElector, LeadershipListener, ReloaderSupervisor};
use shipshape_controller::metrics::ControllerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting ConfigMap reload controller");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: namespace={} selector={} debounce={:?} leader_election={}",
        config.namespace,
        config.app_selector.as_str(),
        config.debounce_window,
        config.leader_election.enabled
    );

    let registry = Arc::new(Registry::new());
    let metrics = Arc::new(ControllerMetrics::register(&registry)?);
    metrics.set_build_info(&config.version, &config.revision);

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let ready = Arc::new(AtomicBool::new(false));
    let leader = Arc::new(AtomicBool::new(false));

    let health_state = HealthState {
        ready: ready.clone(),
        leader: config.leader_election.enabled.then(|| leader.clone()),
        registry: registry.clone(),
    };
    let health_port = config.health_port;
    let health_shutdown = shutdown.clone();
    let health_server = tokio::spawn(async move {
        if let Err(e) = health::serve(health_state, health_port, health_shutdown.clone()).await {
            error!("Health server stopped: {}", e);
            health_shutdown.cancel();
        }
    });

    let ops = Arc::new(KubeClusterOps::new(
        client.clone(),
        config.namespace.clone(),
        config.app_selector.clone(),
    ));
    let supervisor = ReloaderSupervisor::new(
        ops,
        config.rollout_annotation_key.clone(),
        config.debounce_window,
        config.leader_election.controller_stop_timeout,
        metrics.clone(),
        ready,
        leader,
        shutdown.clone(),
    );

    if config.leader_election.enabled {
        let elector = LeaseElector::new(
            client,
            &config.namespace,
            &config.leader_election,
            metrics.clone(),
        );
        elector.run(&supervisor, shutdown.clone()).await;
    } else {
        info!("Leader election disabled; running as the only replica");
        supervisor.on_acquired().await;
        shutdown.cancelled().await;
        supervisor.on_lost().await;
    }

    shutdown.cancel();
    if let Err(e) = health_server.await {
        warn!("Health server task failed: {}", e);
    }

    if supervisor.is_failed() {
        bail!("Controller terminated after an unrecoverable watch loop failure");
    }
    info!("Controller stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .init();
}

/// Cancel `shutdown` on SIGTERM or SIGINT
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}
