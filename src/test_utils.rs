// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking Kubernetes API responses and whole clusters.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use kube::client::Body;
use kube::Client;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

use crate::error::{ReplicantError, Result};
use crate::kubernetes::ops::{ClusterOps, CreateOutcome};
use crate::replication::manifest::{Manifest, ResourceKind};

/// A request seen by the [`MockService`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: String,
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

    /// Add a response for PATCH requests matching the path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Add a response for DELETE requests matching the path
    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
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

        // Fall back to the longest registered prefix
        responses
            .iter()
            .filter(|((m, p), _)| m == method && path.starts_with(p.as_str()))
            .max_by_key(|((_, p), _)| p.len())
            .map(|(_, resp)| resp.clone())
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
        let query = req.uri().query().unwrap_or_default().to_string();

        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body: Bytes = req.into_body().collect().await?.to_bytes();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                query,
                body: String::from_utf8_lossy(&body).to_string(),
            });

            match response {
                Some((status, body)) => Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.into_bytes()))
                    .unwrap()),
                None => {
                    // Default 404 for unmatched requests
                    let body = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"not found","reason":"NotFound","code":404}"#;
                    Ok(Response::builder()
                        .status(404)
                        .header("content-type", "application/json")
                        .body(Body::from(body.as_bytes().to_vec()))
                        .unwrap())
                }
            }
        })
    }
}

/// Create a mock namespace JSON response
pub fn namespace_json(name: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": "test-uid"
        }
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// Ordered log of calls made across every fake in a test
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

type ObjectKey = (ResourceKind, String, String);

/// An in-memory cluster that behaves like an API server for the calls the engine makes.
///
/// Applies record a `managedFields` entry for the applying manager, the way the
/// server does, so repeated reconciliation sees its own configuration.
pub struct FakeCluster {
    name: String,
    objects: Mutex<BTreeMap<ObjectKey, Manifest>>,
    log: CallLog,
    failing_kinds: Mutex<HashSet<ResourceKind>>,
    unreachable: Mutex<bool>,
}

impl FakeCluster {
    pub fn new(name: &str, log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            log,
            failing_kinds: Mutex::new(HashSet::new()),
            unreachable: Mutex::new(false),
        })
    }

    /// Make every apply of `kind` fail
    pub fn fail_applies_of(&self, kind: ResourceKind) {
        self.failing_kinds.lock().unwrap().insert(kind);
    }

    /// Make every call fail as if the cluster could not be reached
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    /// Put an object in place without going through the engine
    pub fn seed(&self, manifest: Manifest) {
        let key = (
            manifest.kind(),
            manifest.namespace().to_string(),
            manifest.name().to_string(),
        );
        self.objects.lock().unwrap().insert(key, manifest);
    }

    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Manifest> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    fn record(&self, call: String) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}: {}", self.name, call));
        if *self.unreachable.lock().unwrap() {
            return Err(ReplicantError::Timeout {
                timeout: Duration::from_secs(30),
                operation: call,
            });
        }
        Ok(())
    }

    fn key(kind: ResourceKind, namespace: &str, name: &str) -> ObjectKey {
        let namespace = if kind == ResourceKind::Namespace {
            String::new()
        } else {
            namespace.to_string()
        };
        (kind, namespace, name.to_string())
    }
}

/// Build the `FieldsV1` trie for every field present in `value`, lists kept atomic.
fn fields_of(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(k, v)| (format!("f:{}", k), fields_of(v)))
                .collect::<Map<_, _>>(),
        ),
        _ => Value::Object(Map::new()),
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Manifest>> {
        self.record(format!("get {} {}/{}", kind, namespace, name))?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&Self::key(kind, namespace, name))
            .cloned())
    }

    async fn create(&self, manifest: &Manifest) -> Result<CreateOutcome> {
        self.record(format!("create {} {}", manifest.kind(), manifest.name()))?;
        let key = Self::key(manifest.kind(), manifest.namespace(), manifest.name());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        objects.insert(key, manifest.clone());
        Ok(CreateOutcome::Created)
    }

    async fn apply(&self, manifest: &Manifest, field_manager: &str) -> Result<()> {
        self.record(format!(
            "apply {} {}/{}",
            manifest.kind(),
            manifest.namespace(),
            manifest.name()
        ))?;
        if self.failing_kinds.lock().unwrap().contains(&manifest.kind()) {
            return Err(ReplicantError::Timeout {
                timeout: Duration::from_secs(30),
                operation: format!("apply {}", manifest.kind()),
            });
        }

        let mut sent = manifest.to_value()?;
        if let Some(object) = sent.as_object_mut() {
            object.remove("apiVersion");
            object.remove("kind");
        }
        let mut stored = manifest.clone();
        let meta = stored.meta_mut();
        meta.uid = Some(format!("uid-{}", manifest.name()));
        meta.resource_version = Some("1".to_string());
        meta.managed_fields = Some(vec![ManagedFieldsEntry {
            manager: Some(field_manager.to_string()),
            operation: Some("Apply".to_string()),
            fields_v1: Some(FieldsV1(fields_of(&sent))),
            ..Default::default()
        }]);

        let key = Self::key(manifest.kind(), manifest.namespace(), manifest.name());
        self.objects.lock().unwrap().insert(key, stored);
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete {} {}/{}", kind, namespace, name))?;
        self.objects
            .lock()
            .unwrap()
            .remove(&Self::key(kind, namespace, name));
        Ok(())
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>> {
        self.record(format!("list {} {}", kind, namespace))?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, ns, _)| *k == kind && ns == namespace)
            .map(|(_, _, name)| name.clone())
            .collect())
    }
}

/// Calls in `log` that changed state
pub fn mutating_calls(log: &CallLog) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|c| {
            c.contains(": apply ") || c.contains(": create ") || c.contains(": delete ")
        })
        .cloned()
        .collect()
}
