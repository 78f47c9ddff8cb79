// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mock Kubernetes API server and an in-memory cluster.

use crate::error::{ControllerError, Result};
use crate::kubernetes::{ClusterOps, WatchStream};
use crate::types::{ConfigKey, ConfigListing, ConfigObject, TargetWorkload, WatchEvent};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::core::ErrorResponse;
use kube::Client;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A request seen by [`MockService`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    /// Add a response for PUT requests matching the path
    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    /// Add a response for PATCH requests matching the path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Try prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let content_type = req
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body = req.into_body().collect().await?.to_bytes().to_vec();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                query,
                content_type,
                body,
            });

            match response {
                Some((status, body)) => Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.into_bytes()))
                    .unwrap()),
                None => {
                    // Default 404 for unmatched requests
                    let body = status_json(404, "NotFound", "not found");
                    Ok(Response::builder()
                        .status(404)
                        .header("content-type", "application/json")
                        .body(Body::from(body.into_bytes()))
                        .unwrap())
                }
            }
        })
    }
}

/// A Kubernetes `Status` failure body
pub fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// An API error as surfaced by kube for the given status code
pub fn api_error(code: u16) -> ControllerError {
    ControllerError::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected failure {}", code),
        reason: "Injected".to_string(),
        code,
    }))
}

pub fn config_object(env: &str, name: &str, data: &[(&str, &str)]) -> ConfigObject {
    ConfigObject::new(
        ConfigKey::new(env, name),
        data.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

/// How a scripted watch stream behaves once its events are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closes the stream (watch timeout)
    Close,
    /// The stream stays open without further events
    Hang,
}

enum ScriptedItem {
    Event(WatchEvent),
    Error(u16),
}

enum WatchScript {
    Items {
        items: Vec<ScriptedItem>,
        end: StreamEnd,
    },
    Channel(mpsc::UnboundedReceiver<Result<WatchEvent>>),
}

#[derive(Default)]
struct FakeState {
    objects: Vec<ConfigObject>,
    resource_version: u64,
    list_failures: VecDeque<u16>,
    watch_open_failures: VecDeque<u16>,
    watch_scripts: VecDeque<WatchScript>,
    workloads: Vec<(String, TargetWorkload)>,
    workload_list_failures: VecDeque<u16>,
    patch_failures: HashMap<String, VecDeque<u16>>,
    patches: Vec<(String, BTreeMap<String, String>)>,
    patch_delay: Option<Duration>,
    list_calls: usize,
    watch_calls: Vec<String>,
    calls: Vec<String>,
}

/// In-memory cluster with scripted list/watch/patch behaviour.
///
/// Patches are applied to the stored workloads so idempotency checks see them.
#[derive(Clone, Default)]
pub struct FakeClusterOps {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClusterOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, object: ConfigObject) -> Self {
        self.set_object(object);
        self
    }

    pub fn with_workload(self, env: &str, name: &str, annotations: &[(&str, &str)]) -> Self {
        let workload = TargetWorkload::new(
            name,
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.state
            .lock()
            .unwrap()
            .workloads
            .push((env.to_string(), workload));
        self
    }

    /// Insert or replace a listed object
    pub fn set_object(&self, object: ConfigObject) {
        let mut state = self.state.lock().unwrap();
        state.objects.retain(|o| o.key != object.key);
        state.objects.push(object);
    }

    pub fn fail_next_list(&self, code: u16) {
        self.state.lock().unwrap().list_failures.push_back(code);
    }

    pub fn fail_next_watch_open(&self, code: u16) {
        self.state.lock().unwrap().watch_open_failures.push_back(code);
    }

    pub fn fail_next_workload_list(&self, code: u16) {
        self.state
            .lock()
            .unwrap()
            .workload_list_failures
            .push_back(code);
    }

    /// Queue the next watch stream: `events`, then `end`
    pub fn script_watch(&self, events: Vec<WatchEvent>, end: StreamEnd) {
        self.script_watch_items(events.into_iter().map(ScriptedItem::Event).collect(), end);
    }

    /// Queue a watch stream delivering `events` and then failing with `code`
    pub fn script_watch_error(&self, events: Vec<WatchEvent>, code: u16) {
        let mut items: Vec<ScriptedItem> = events.into_iter().map(ScriptedItem::Event).collect();
        items.push(ScriptedItem::Error(code));
        self.script_watch_items(items, StreamEnd::Close);
    }

    fn script_watch_items(&self, items: Vec<ScriptedItem>, end: StreamEnd) {
        self.state
            .lock()
            .unwrap()
            .watch_scripts
            .push_back(WatchScript::Items { items, end });
    }

    /// Queue a watch stream fed by the returned sender; it ends when the sender drops
    pub fn watch_channel(&self) -> mpsc::UnboundedSender<Result<WatchEvent>> {
        let (tx, rx) = mpsc::unbounded();
        self.state
            .lock()
            .unwrap()
            .watch_scripts
            .push_back(WatchScript::Channel(rx));
        tx
    }

    /// Fail the next `times` patches of `workload` with `code`
    pub fn fail_patches(&self, workload: &str, code: u16, times: usize) {
        let mut state = self.state.lock().unwrap();
        let failures = state.patch_failures.entry(workload.to_string()).or_default();
        failures.extend(std::iter::repeat(code).take(times));
    }

    /// Make every patch take `delay` before it completes
    pub fn delay_patches(&self, delay: Duration) {
        self.state.lock().unwrap().patch_delay = Some(delay);
    }

    /// Successful patches in order
    pub fn patches(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn workload(&self, name: &str) -> Option<TargetWorkload> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .iter()
            .find(|(_, w)| w.name == name)
            .map(|(_, w)| w.clone())
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    /// Cursors each watch was opened from
    pub fn watch_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().watch_calls.clone()
    }

    /// Every cluster call in order: `list`, `watch:<rv>`, `workloads:<env>`, `patch:<name>`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ClusterOps for FakeClusterOps {
    async fn list_config_objects(&self) -> Result<ConfigListing> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        state.calls.push("list".to_string());
        if let Some(code) = state.list_failures.pop_front() {
            return Err(api_error(code));
        }
        state.resource_version += 1;
        Ok(ConfigListing {
            objects: state.objects.clone(),
            resource_version: Some(state.resource_version.to_string()),
        })
    }

    async fn watch_config_objects(&self, from_version: &str) -> Result<WatchStream> {
        let mut state = self.state.lock().unwrap();
        state.watch_calls.push(from_version.to_string());
        state.calls.push(format!("watch:{}", from_version));
        if let Some(code) = state.watch_open_failures.pop_front() {
            return Err(api_error(code));
        }

        let (items, end) = match state.watch_scripts.pop_front() {
            None => return Ok(futures::stream::pending().boxed()),
            Some(WatchScript::Channel(rx)) => return Ok(rx.boxed()),
            Some(WatchScript::Items { items, end }) => (items, end),
        };

        let items: Vec<Result<WatchEvent>> = items
            .into_iter()
            .map(|item| match item {
                ScriptedItem::Event(event) => Ok(event),
                ScriptedItem::Error(code) => Err(api_error(code)),
            })
            .collect();
        let events = futures::stream::iter(items);

        Ok(match end {
            StreamEnd::Close => events.boxed(),
            StreamEnd::Hang => events.chain(futures::stream::pending()).boxed(),
        })
    }

    async fn list_workloads(&self, environment: &str) -> Result<Vec<TargetWorkload>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("workloads:{}", environment));
        if let Some(code) = state.workload_list_failures.pop_front() {
            return Err(api_error(code));
        }
        Ok(state
            .workloads
            .iter()
            .filter(|(env, _)| env == environment)
            .map(|(_, w)| w.clone())
            .collect())
    }

    async fn patch_workload_annotations(
        &self,
        workload: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        let delay = self.state.lock().unwrap().patch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("patch:{}", workload));
        if let Some(code) = state
            .patch_failures
            .get_mut(workload)
            .and_then(VecDeque::pop_front)
        {
            return Err(api_error(code));
        }

        if let Some((_, target)) = state.workloads.iter_mut().find(|(_, w)| w.name == workload) {
            target.annotations.extend(annotations.clone());
        }
        state
            .patches
            .push((workload.to_string(), annotations.clone()));
        Ok(())
    }
}
