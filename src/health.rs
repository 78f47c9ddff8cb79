// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Liveness, readiness, leadership and metrics endpoints.

use crate::error::Result;
use crate::metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    /// Watch loop finished its initial list
    pub ready: Arc<AtomicBool>,
    /// `None` when leader election is disabled
    pub leader: Option<Arc<AtomicBool>>,
    pub registry: Arc<Registry>,
}

impl HealthState {
    fn is_leader(&self) -> bool {
        self.leader
            .as_ref()
            .map_or(true, |leader| leader.load(Ordering::SeqCst))
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/leadz", get(leadz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn leadz(State(state): State<HealthState>) -> Response {
    if state.is_leader() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not leader").into_response()
    }
}

async fn readyz(State(state): State<HealthState>) -> Response {
    let ready = state.ready.load(Ordering::SeqCst);
    let leader = state.is_leader();
    let status = if ready && leader {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, format!("ready={} leader={}", ready, leader)).into_response()
}

async fn metrics_handler(State(state): State<HealthState>) -> Response {
    match metrics::export(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve the health endpoints on `0.0.0.0:port` until `shutdown` is cancelled
pub async fn serve(state: HealthState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Health server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use prometheus::IntCounter;
    use tower::ServiceExt;

    fn state(ready: bool, leader: Option<bool>) -> HealthState {
        HealthState {
            ready: Arc::new(AtomicBool::new(ready)),
            leader: leader.map(|l| Arc::new(AtomicBool::new(l))),
            registry: Arc::new(Registry::new()),
        }
    }

    async fn get(state: HealthState, path: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        assert_eq!(
            get(state(false, Some(false)), "/healthz").await,
            (StatusCode::OK, "ok".to_string())
        );
    }

    #[tokio::test]
    async fn test_leadz_reflects_leadership() {
        assert_eq!(get(state(true, Some(true)), "/leadz").await.0, StatusCode::OK);
        assert_eq!(
            get(state(true, Some(false)), "/leadz").await,
            (StatusCode::SERVICE_UNAVAILABLE, "not leader".to_string())
        );
        // Leader election disabled
        assert_eq!(get(state(true, None), "/leadz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_requires_ready_and_leader() {
        assert_eq!(
            get(state(true, Some(true)), "/readyz").await,
            (StatusCode::OK, "ready=true leader=true".to_string())
        );
        assert_eq!(
            get(state(false, Some(true)), "/readyz").await,
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "ready=false leader=true".to_string()
            )
        );
        assert_eq!(
            get(state(true, Some(false)), "/readyz").await,
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "ready=true leader=false".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_metrics_exports_registry() {
        let state = state(true, None);
        let counter = IntCounter::new("configmap_reload_test_total", "test").unwrap();
        state.registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let (status, body) = get(state, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("configmap_reload_test_total 1"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        assert_eq!(get(state(true, None), "/nope").await.0, StatusCode::NOT_FOUND);
    }
}
