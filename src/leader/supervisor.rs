// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Starts a fresh watch loop per leadership term and stops it on handoff.
//!
//! At most one watch loop may run per process. Anything that could break that
//! (a loop that will not stop, a second start while one is alive) or a loop that
//! ends on its own shuts the whole process down instead.

use crate::kubernetes::ClusterOps;
use crate::leader::elector::LeadershipListener;
use crate::metrics::ControllerMetrics;
use crate::reload::WatchLoop;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct RunningLoop {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ReloaderSupervisor {
    ops: Arc<dyn ClusterOps>,
    restart_annotation_key: String,
    debounce_window: Duration,
    stop_timeout: Duration,
    metrics: Arc<ControllerMetrics>,
    ready: Arc<AtomicBool>,
    leader: Arc<AtomicBool>,
    /// Process-wide shutdown; cancelled to escalate
    shutdown: CancellationToken,
    failed: Arc<AtomicBool>,
    running: Mutex<Option<RunningLoop>>,
}

impl ReloaderSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ops: Arc<dyn ClusterOps>,
        restart_annotation_key: impl Into<String>,
        debounce_window: Duration,
        stop_timeout: Duration,
        metrics: Arc<ControllerMetrics>,
        ready: Arc<AtomicBool>,
        leader: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ops,
            restart_annotation_key: restart_annotation_key.into(),
            debounce_window,
            stop_timeout,
            metrics,
            ready,
            leader,
            shutdown,
            failed: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    /// Whether the process should exit with a failure
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn escalate(&self) {
        self.failed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

#[async_trait]
impl LeadershipListener for ReloaderSupervisor {
    async fn on_acquired(&self) {
        let mut running = self.running.lock().await;
        if self.shutdown.is_cancelled() {
            return;
        }
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            error!("Refusing to start a new watch loop while the previous one is still running");
            self.escalate();
            return;
        }

        self.leader.store(true, Ordering::SeqCst);
        let stop = self.shutdown.child_token();
        let watch_loop = WatchLoop::new(
            self.ops.clone(),
            &self.restart_annotation_key,
            self.debounce_window,
            self.metrics.clone(),
            self.ready.clone(),
        );

        let loop_stop = stop.clone();
        let shutdown = self.shutdown.clone();
        let failed = self.failed.clone();
        let handle = tokio::spawn(async move {
            let result = watch_loop.run(loop_stop.clone()).await;
            if result.is_err() || !loop_stop.is_cancelled() {
                error!("Watch loop exited without a stop signal; terminating process");
                failed.store(true, Ordering::SeqCst);
                shutdown.cancel();
            }
        });

        info!("Started ConfigMap watch loop");
        *running = Some(RunningLoop { stop, handle });
    }

    async fn on_lost(&self) -> bool {
        let mut running = self.running.lock().await;
        self.leader.store(false, Ordering::SeqCst);

        let Some(mut current) = running.take() else {
            return true;
        };
        current.stop.cancel();

        let stopped = tokio::time::timeout(self.stop_timeout, &mut current.handle).await;
        match stopped {
            Ok(Ok(())) => {
                info!("ConfigMap watch loop stopped");
                true
            }
            Ok(Err(e)) => {
                error!("ConfigMap watch loop panicked: {}", e);
                self.escalate();
                true
            }
            Err(_) => {
                error!(
                    "Watch loop did not stop within {:?} during leadership handoff; forcing process shutdown",
                    self.stop_timeout
                );
                warn!("Keeping the unstopped watch loop registered so no second loop can start");
                *running = Some(current);
                self.escalate();
                false
            }
        }
    }
}
