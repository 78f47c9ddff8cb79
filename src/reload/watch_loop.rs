// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! List, seed, drift check, then watch ConfigMaps until stopped.
//!
//! One `WatchLoop` exists per leadership term and owns its hash cache and
//! restart queue. The only cross-task input is the cancellation token, which
//! interrupts list calls, backoff sleeps and stream reads alike. Whatever way the
//! loop ends, every pending restart is executed before `run` returns.

use crate::error::{ControllerError, Result};
use crate::kubernetes::{ClusterOps, WatchStream};
use crate::metrics::ControllerMetrics;
use crate::reload::backoff::JitteredBackoff;
use crate::reload::detector::{detect, Detection};
use crate::reload::drift::DriftReconciler;
use crate::reload::executor::RestartExecutor;
use crate::reload::hash_cache::HashCache;
use crate::reload::queue::{PendingRestartQueue, Schedule};
use crate::types::{ConfigKey, ConfigListing, WatchEvent};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Why a watch stream stopped being consumed
enum StreamEnd {
    Stopped,
    /// Server closed the stream; reopen from the cursor
    Closed,
    Failed(ControllerError),
}

enum Wake {
    Timer,
    Stream(Option<Result<WatchEvent>>),
}

pub struct WatchLoop {
    ops: Arc<dyn ClusterOps>,
    cache: HashCache,
    queue: PendingRestartQueue,
    executor: RestartExecutor,
    drift: DriftReconciler,
    backoff: JitteredBackoff,
    metrics: Arc<ControllerMetrics>,
    /// Set once the initial list completed, cleared when the loop ends
    ready: Arc<AtomicBool>,
}

impl WatchLoop {
    pub fn new(
        ops: Arc<dyn ClusterOps>,
        restart_annotation_key: &str,
        debounce_window: Duration,
        metrics: Arc<ControllerMetrics>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            executor: RestartExecutor::new(ops.clone(), restart_annotation_key),
            drift: DriftReconciler::new(ops.clone(), restart_annotation_key),
            ops,
            cache: HashCache::new(),
            queue: PendingRestartQueue::new(debounce_window),
            backoff: JitteredBackoff::default(),
            metrics,
            ready,
        }
    }

    /// Run until `shutdown` is cancelled or a fatal API error occurs.
    ///
    /// Pending restarts are flushed in both cases; restarts still failing during
    /// the flush are counted as dropped.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting ConfigMap watch loop (debounce window {:?})",
            self.queue.window()
        );

        let result = self.watch_until_stopped(&shutdown).await;
        self.ready.store(false, Ordering::SeqCst);
        if let Err(e) = &result {
            error!("ConfigMap watch loop failed: {}", e);
        }

        self.flush_pending().await;
        info!("ConfigMap watch loop stopped");
        result
    }

    async fn watch_until_stopped(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let Some(listing) = self.list_with_backoff(shutdown).await? else {
            return Ok(());
        };
        let mut cursor = self.seed(listing).await;
        self.ready.store(true, Ordering::SeqCst);

        // Drift repairs are due now and run before the watch opens
        self.execute_due().await;

        let mut streams_opened: u64 = 0;
        loop {
            let opened = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                opened = self.ops.watch_config_objects(&cursor) => opened,
            };

            let end = match opened {
                Ok(stream) => {
                    if streams_opened > 0 {
                        self.metrics.watch_reconnects_total.inc();
                    }
                    streams_opened += 1;
                    info!("Watching ConfigMaps from resourceVersion {:?}", cursor);
                    self.consume(stream, &mut cursor, shutdown).await
                }
                Err(e) => StreamEnd::Failed(e),
            };

            match end {
                StreamEnd::Stopped => return Ok(()),
                StreamEnd::Closed => debug!("Watch stream closed, reopening"),
                StreamEnd::Failed(e) => {
                    self.metrics.watch_errors_total.inc();
                    if e.is_fatal() {
                        error!(
                            "Kubernetes API watch denied (status={:?}). Check controller RBAC \
                             and service account permissions.",
                            e.status_code()
                        );
                        return Err(e);
                    }

                    if e.is_gone() {
                        warn!("Watch resource version expired, re-listing");
                    } else {
                        warn!("Kubernetes API watch error: {}", e);
                        if !self.sleep_backoff(shutdown).await {
                            return Ok(());
                        }
                    }

                    let Some(listing) = self.list_with_backoff(shutdown).await? else {
                        return Ok(());
                    };
                    cursor = self.resync(listing);
                }
            }
        }
    }

    /// Read events until the stream ends, draining due restarts on every wake-up
    async fn consume(
        &mut self,
        mut stream: WatchStream,
        cursor: &mut String,
        shutdown: &CancellationToken,
    ) -> StreamEnd {
        loop {
            let delay = self.queue.next_wake_delay(Instant::now());
            let wake = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StreamEnd::Stopped,
                _ = tokio::time::sleep(delay) => Wake::Timer,
                next = stream.next() => Wake::Stream(next),
            };

            match wake {
                Wake::Timer => {}
                Wake::Stream(None) => {
                    self.backoff.reset();
                    self.execute_due().await;
                    return StreamEnd::Closed;
                }
                Wake::Stream(Some(Err(e))) => return StreamEnd::Failed(e),
                Wake::Stream(Some(Ok(event))) => {
                    self.backoff.reset();
                    if let Some(version) = event.resource_version().filter(|v| !v.is_empty()) {
                        *cursor = version.to_string();
                    }
                    self.observe(&event, Instant::now());
                }
            }

            self.execute_due().await;
        }
    }

    /// List until success. `Ok(None)` means the loop was stopped while waiting.
    async fn list_with_backoff(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<ConfigListing>> {
        loop {
            let listed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(None),
                listed = self.ops.list_config_objects() => listed,
            };

            match listed {
                Ok(listing) => return Ok(Some(listing)),
                Err(e) if e.is_fatal() => {
                    error!(
                        "Kubernetes API access denied during ConfigMap list (status={:?}). \
                         Check controller RBAC and service account permissions.",
                        e.status_code()
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!("Kubernetes ConfigMap list failed: {}", e);
                    self.metrics.watch_errors_total.inc();
                    if !self.sleep_backoff(shutdown).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Returns false when stopped during the sleep
    async fn sleep_backoff(&mut self, shutdown: &CancellationToken) -> bool {
        let delay = self.backoff.next_delay();
        debug!("Backing off for {:?}", delay);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Seed the cache from the initial listing and schedule drift repairs
    async fn seed(&mut self, listing: ConfigListing) -> String {
        for object in &listing.objects {
            self.cache.seed(object.key.clone(), object.content_hash());
        }
        info!("Seeded {} ConfigMap hash(es)", listing.objects.len());

        let now = Instant::now();
        for repair in self.drift.reconcile(&listing.objects).await {
            self.queue.schedule_immediate(repair.key, repair.hash, now);
        }
        self.metrics.pending_restarts.set(self.queue.len() as i64);

        listing.resource_version.unwrap_or_default()
    }

    /// Re-list after a lost watch: any differing hash is a missed change
    fn resync(&mut self, listing: ConfigListing) -> String {
        let now = Instant::now();
        let count = listing.objects.len();
        for object in listing.objects {
            self.observe(&WatchEvent::Modified(object), now);
        }
        info!("Re-listed {} ConfigMap(s)", count);
        listing.resource_version.unwrap_or_default()
    }

    fn observe(&mut self, event: &WatchEvent, now: Instant) {
        let pending = event
            .object()
            .and_then(|object| self.queue.pending_hash(&object.key));

        match detect(event, &mut self.cache, pending) {
            Detection::Suppressed(reason) => {
                debug!("Ignoring {} event: {:?}", event.kind(), reason);
            }
            Detection::Meaningful { key, hash } => self.schedule(key, hash, now),
        }
    }

    fn schedule(&mut self, key: ConfigKey, hash: String, now: Instant) {
        match self.queue.on_meaningful_change(key.clone(), hash, now) {
            Schedule::Immediate => {
                info!("ConfigMap {} changed, restarting matching deployments", key);
            }
            Schedule::Debounced { due_at } => {
                self.metrics
                    .debounced_total
                    .with_label_values(&[key.environment.as_str()])
                    .inc();
                info!(
                    "Debounced ConfigMap change for {}, restart due in {:?}",
                    key,
                    due_at.saturating_duration_since(now)
                );
            }
        }
        self.metrics.pending_restarts.set(self.queue.len() as i64);
    }

    async fn execute_due(&mut self) {
        for due in self.queue.drain_due(Instant::now()) {
            let outcome = self.executor.restart(&due.key, &due.target_hash).await;
            self.metrics.record_restarts(
                &outcome.environment,
                outcome.restarted as u64,
                outcome.failed as u64,
            );

            let now = Instant::now();
            if outcome.is_complete() {
                self.queue.mark_succeeded(&due.key, &due.target_hash, now);
                self.cache.commit(due.key, due.target_hash);
            } else if let Some(delay) = self.queue.mark_failed(&due.key, &due.target_hash, now) {
                self.metrics
                    .retry_total
                    .with_label_values(&[due.key.environment.as_str()])
                    .inc();
                warn!(
                    "Restart for {} failed, scheduling retry attempt {} in {:?}",
                    due.key,
                    due.retry_attempt + 1,
                    delay
                );
            }
        }
        self.metrics.pending_restarts.set(self.queue.len() as i64);
    }

    /// Execute every pending restart regardless of its due time
    async fn flush_pending(&mut self) {
        let pending = self.queue.force_drain_all();
        self.metrics.pending_restarts.set(0);
        if pending.is_empty() {
            return;
        }

        warn!("Forcing {} pending restart(s) before shutdown", pending.len());
        for due in pending {
            let outcome = self.executor.restart(&due.key, &due.target_hash).await;
            self.metrics.record_restarts(
                &outcome.environment,
                outcome.restarted as u64,
                outcome.failed as u64,
            );

            if outcome.is_complete() {
                self.cache.commit(due.key, due.target_hash);
            } else {
                self.metrics.dropped_restarts_total.inc();
                error!(
                    "Forced restart for {} failed during shutdown, dropping pending intent",
                    due.key
                );
            }
        }
    }
}
