// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Lease-based leader election over `coordination.k8s.io/v1`.
//!
//! Every `retry_period` the elector reads the Lease and either creates it,
//! renews it (we hold it) or takes it over once the holder stopped renewing for
//! longer than the lease duration. Optimistic concurrency on the Lease's
//! resourceVersion turns concurrent writers into 409 conflicts, which are simply
//! retried on the next cycle.

use crate::config::LeaderElectionConfig;
use crate::metrics::ControllerMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Receives leadership transitions
#[async_trait]
pub trait LeadershipListener: Send + Sync {
    /// This replica became leader
    async fn on_acquired(&self);

    /// This replica is no longer leader; must not return before work has stopped.
    ///
    /// Returns false when the work could not be confirmed stopped. The lease is
    /// then left to expire instead of being released.
    async fn on_lost(&self) -> bool;
}

/// Whether `identity` may write `spec` as holder at `now`.
///
/// A missing or released holder is free, our own lease can always be renewed and
/// another holder's lease only once `renewTime + leaseDuration` has passed.
pub fn lease_available(
    spec: Option<&LeaseSpec>,
    identity: &str,
    now: DateTime<Utc>,
    default_duration: Duration,
) -> bool {
    let Some(spec) = spec else {
        return true;
    };

    match spec.holder_identity.as_deref() {
        None | Some("") => return true,
        Some(holder) if holder == identity => return true,
        Some(_) => {}
    }

    let Some(MicroTime(renewed)) = spec.renew_time.as_ref() else {
        return true;
    };
    let duration = spec
        .lease_duration_seconds
        .and_then(|secs| u64::try_from(secs).ok())
        .map_or(default_duration, Duration::from_secs);

    match (now - *renewed).to_std() {
        Ok(elapsed) => elapsed >= duration,
        // Renewed in the future according to our clock
        Err(_) => false,
    }
}

pub struct LeaseElector {
    leases: Api<Lease>,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
    metrics: Arc<ControllerMetrics>,
    clock: fn() -> DateTime<Utc>,
}

impl LeaseElector {
    pub fn new(
        client: Client,
        namespace: &str,
        config: &LeaderElectionConfig,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            lease_name: config.lease_name.clone(),
            identity: config.identity.clone(),
            lease_duration: config.lease_duration,
            renew_deadline: config.renew_deadline,
            retry_period: config.retry_period,
            metrics,
            clock: Utc::now,
        }
    }

    fn lease_duration_seconds(&self) -> i32 {
        i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX)
    }

    /// One acquire-or-renew cycle; true when we hold the lease afterwards
    #[instrument(skip(self), fields(lease = %self.lease_name))]
    async fn try_acquire_or_renew(&self) -> bool {
        let now = (self.clock)();
        let lease = match self.leases.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(err)) if err.code == 404 => return self.create_lease(now).await,
            Err(e) => {
                warn!("Failed to read lease {}: {}", self.lease_name, e);
                return false;
            }
        };

        if !lease_available(lease.spec.as_ref(), &self.identity, now, self.lease_duration) {
            debug!("Lease {} is held by another replica", self.lease_name);
            return false;
        }

        self.update_lease(lease, now).await
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> bool {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration_seconds()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };

        match self.leases.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!("Created leader lease {}", self.lease_name);
                true
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!("Lease {} already exists, will retry", self.lease_name);
                false
            }
            Err(e) => {
                warn!("Failed to create lease {}: {}", self.lease_name, e);
                false
            }
        }
    }

    async fn update_lease(&self, mut lease: Lease, now: DateTime<Utc>) -> bool {
        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        let taking_over = spec.holder_identity.as_deref() != Some(self.identity.as_str());
        if taking_over {
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        }
        if taking_over || spec.acquire_time.is_none() {
            spec.acquire_time = Some(MicroTime(now));
        }
        spec.holder_identity = Some(self.identity.clone());
        spec.renew_time = Some(MicroTime(now));
        spec.lease_duration_seconds = Some(self.lease_duration_seconds());

        match self
            .leases
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => true,
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!("Lease {} update conflict, will retry", self.lease_name);
                false
            }
            Err(e) => {
                warn!("Failed to update lease {}: {}", self.lease_name, e);
                false
            }
        }
    }

    /// Clear the holder so another replica can take over without waiting
    async fn release_lease(&self) {
        let mut lease = match self.leases.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Failed to release leader lease {}: {}", self.lease_name, e);
                return;
            }
        };

        let Some(spec) = lease.spec.as_mut() else {
            return;
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return;
        }
        spec.holder_identity = None;

        match self
            .leases
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => info!("Released leader lease {}", self.lease_name),
            Err(e) => warn!("Failed to release leader lease {}: {}", self.lease_name, e),
        }
    }

    /// Campaign for and keep leadership until `shutdown` is cancelled.
    ///
    /// Renewal failures are tolerated until `renew_deadline` has passed since the
    /// last successful renewal. On shutdown `on_lost` is awaited first and a
    /// held lease is released only once the listener confirmed its work stopped.
    pub async fn run(&self, listener: &dyn LeadershipListener, shutdown: CancellationToken) {
        info!(
            "Starting leader election for lease {} (identity={})",
            self.lease_name, self.identity
        );

        let mut is_leader = false;
        let mut wait_started = Instant::now();
        let mut last_renewed = wait_started;
        self.metrics.leader_state.set(0);

        while !shutdown.is_cancelled() {
            let acquired = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                acquired = self.try_acquire_or_renew() => acquired,
            };
            let now = Instant::now();

            match (acquired, is_leader) {
                (true, false) => {
                    is_leader = true;
                    last_renewed = now;
                    info!("Became leader (identity={})", self.identity);
                    self.metrics.leader_state.set(1);
                    self.metrics.record_leader_transition("acquired");
                    self.metrics
                        .leader_acquire_latency_seconds
                        .observe((now - wait_started).as_secs_f64());
                    listener.on_acquired().await;
                }
                (true, true) => last_renewed = now,
                (false, true) => {
                    let elapsed = now - last_renewed;
                    if elapsed < self.renew_deadline {
                        warn!(
                            "Lease renewal failed; holding leadership for up to {:?} (elapsed {:?})",
                            self.renew_deadline, elapsed
                        );
                    } else {
                        is_leader = false;
                        warn!("Lost leader lease after {:?} without successful renewal", elapsed);
                        self.metrics.leader_state.set(0);
                        self.metrics.record_leader_transition("lost");
                        wait_started = Instant::now();
                        listener.on_lost().await;
                    }
                }
                (false, false) => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.retry_period) => {}
            }
        }

        if is_leader {
            self.metrics.leader_state.set(0);
            self.metrics.record_leader_transition("lost");
            if listener.on_lost().await {
                self.release_lease().await;
            } else {
                warn!(
                    "Work did not stop cleanly; leaving lease {} to expire",
                    self.lease_name
                );
            }
        }
    }
}
