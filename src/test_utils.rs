// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking the Kubernetes and Dynatrace APIs.

use crate::dtclient::{
    ActiveGateConnectionInfo, DtResult, DynatraceClient, DynatraceClientBuilder, EventData,
    OneAgentConnectionInfo, ProcessModuleConfig, TokenScopes, TokenSet,
};
use crate::error::{DynatraceApiError, Result as OperatorResult};
use crate::types::DynaKube;
use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// Collection names the mock knows how to list from stored objects
const COLLECTIONS: &[&str] = &[
    "secrets",
    "configmaps",
    "namespaces",
    "nodes",
    "dynakubes",
    "pods",
    "replicasets",
    "deployments",
];

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: String,
}

#[derive(Default)]
struct MockState {
    responses: HashMap<(String, String), (u16, String)>,
    requests: Vec<RecordedRequest>,
}

/// A mock Kubernetes API server.
///
/// Registered responses win. Otherwise objects created with POST, replaced
/// with PUT or patched with PATCH are kept, so later GETs and list calls see
/// them, and DELETE removes them.
#[derive(Clone, Default)]
pub struct MockService {
    state: Arc<Mutex<MockState>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.state.lock().unwrap().responses.insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the exact path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// All requests that modify state
    pub fn writes(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != "GET")
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    /// The object currently served for `path`, if any
    pub fn stored(&self, path: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .responses
            .get(&("GET".to_string(), path.to_string()))
            .filter(|(status, _)| *status == 200)
            .and_then(|(_, body)| serde_json::from_str(body).ok())
    }
}

fn status_json(code: u16, reason: &str, message: &str) -> String {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": if code < 400 { "Success" } else { "Failure" },
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn label_selector(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k == "labelSelector")
        .flat_map(|(_, v)| {
            v.split(',')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

impl MockState {
    fn get(&self, path: &str) -> Option<Value> {
        self.responses
            .get(&("GET".to_string(), path.to_string()))
            .filter(|(status, _)| *status == 200)
            .and_then(|(_, body)| serde_json::from_str(body).ok())
    }

    fn store(&mut self, path: &str, object: &Value) {
        self.responses.insert(
            ("GET".to_string(), path.to_string()),
            (200, object.to_string()),
        );
    }

    /// Build a list from stored objects living directly under `path`
    fn list(&self, path: &str, query: &str) -> Option<Value> {
        let resource = path.rsplit('/').next()?;
        if !COLLECTIONS.contains(&resource) {
            return None;
        }
        // Cluster-wide listing of a namespaced resource, e.g. /api/v1/secrets
        let group_prefix = path.strip_suffix(resource)?;
        let selector = label_selector(query);

        let mut items: Vec<(String, Value)> = self
            .responses
            .iter()
            .filter(|((method, _), (status, _))| method == "GET" && *status == 200)
            .filter(|((_, p), _)| {
                let direct = p
                    .strip_prefix(path)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .is_some_and(|name| !name.contains('/'));
                let cluster_wide = p
                    .strip_prefix(group_prefix)
                    .and_then(|rest| rest.strip_prefix("namespaces/"))
                    .map(|rest| rest.split('/').collect::<Vec<_>>())
                    .is_some_and(|parts| parts.len() == 3 && parts[1] == resource);
                direct || cluster_wide
            })
            .filter_map(|((_, p), (_, body))| {
                serde_json::from_str::<Value>(body)
                    .ok()
                    .filter(|v| v.get("items").is_none() && v.get("metadata").is_some())
                    .map(|v| (p.clone(), v))
            })
            .filter(|(_, v)| {
                selector
                    .iter()
                    .all(|(k, expected)| v["metadata"]["labels"][k].as_str() == Some(expected))
            })
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));

        Some(json!({
            "apiVersion": "v1",
            "kind": "List",
            "metadata": {"resourceVersion": "1"},
            "items": items.into_iter().map(|(_, v)| v).collect::<Vec<_>>()
        }))
    }

    fn respond(&mut self, method: &str, path: &str, query: &str, body: &str) -> (u16, String) {
        if let Some(resp) = self
            .responses
            .get(&(method.to_string(), path.to_string()))
        {
            return resp.clone();
        }

        match method {
            "GET" => self
                .list(path, query)
                .map(|list| (200, list.to_string()))
                .unwrap_or_else(|| (404, status_json(404, "NotFound", "not found"))),
            "POST" => {
                let Ok(object) = serde_json::from_str::<Value>(body) else {
                    return (400, status_json(400, "BadRequest", "invalid body"));
                };
                let name = object["metadata"]["name"].as_str().unwrap_or_default();
                let item_path = format!("{}/{}", path, name);
                if self.get(&item_path).is_some() {
                    return (409, status_json(409, "AlreadyExists", "already exists"));
                }
                self.store(&item_path, &object);
                (201, object.to_string())
            }
            "PUT" => {
                if self.get(path).is_none() {
                    return (404, status_json(404, "NotFound", "not found"));
                }
                let Ok(object) = serde_json::from_str::<Value>(body) else {
                    return (400, status_json(400, "BadRequest", "invalid body"));
                };
                self.store(path, &object);
                (200, object.to_string())
            }
            "PATCH" => {
                let base = path.strip_suffix("/status").unwrap_or(path);
                let Some(mut object) = self.get(base) else {
                    return (404, status_json(404, "NotFound", "not found"));
                };
                let Ok(patch) = serde_json::from_str::<Value>(body) else {
                    return (400, status_json(400, "BadRequest", "invalid body"));
                };
                merge_patch(&mut object, &patch);
                self.store(base, &object);
                (200, object.to_string())
            }
            "DELETE" => {
                if self.get(path).is_none() {
                    return (404, status_json(404, "NotFound", "not found"));
                }
                self.responses
                    .remove(&("GET".to_string(), path.to_string()));
                (200, status_json(200, "", "deleted"))
            }
            _ => (405, status_json(405, "MethodNotAllowed", "unsupported")),
        }
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let state = self.state.clone();

        Box::pin(async move {
            let bytes = req
                .into_body()
                .collect()
                .await
                .map(|c| c.to_bytes())
                .unwrap_or_default();
            let body = String::from_utf8_lossy(&bytes).to_string();

            let (status, response) = {
                let mut state = state.lock().unwrap();
                state.requests.push(RecordedRequest {
                    method: method.clone(),
                    path: path.clone(),
                    query: query.clone(),
                    body: body.clone(),
                });
                state.respond(&method, &path, &query, &body)
            };

            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(response.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a mock namespace JSON response
pub fn namespace_json(name: &str, labels: &[(&str, &str)]) -> String {
    let labels: BTreeMap<&str, &str> = labels.iter().copied().collect();
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": format!("uid-{}", name),
            "resourceVersion": "1",
            "labels": labels
        }
    })
    .to_string()
}

/// Create a mock secret JSON response with plain-text values
pub fn secret_json(namespace: &str, name: &str, data: &[(&str, &str)]) -> String {
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;

    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    };
    serde_json::to_string(&secret).unwrap()
}

pub fn config_map_json(namespace: &str, name: &str, data: &[(&str, &str)]) -> String {
    let data: BTreeMap<&str, &str> = data.iter().copied().collect();
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": namespace, "resourceVersion": "1"},
        "data": data
    })
    .to_string()
}

pub fn dynakube_json(dynakube: &DynaKube) -> String {
    serde_json::to_string(dynakube).unwrap()
}

/// Configurable stand-in for the Dynatrace API
#[derive(Default)]
pub struct MockDynatraceClient {
    scopes: Mutex<HashMap<String, DtResult<TokenScopes>>>,
    oneagent_connection_info: Mutex<Option<DtResult<OneAgentConnectionInfo>>>,
    activegate_connection_info: Mutex<Option<DtResult<ActiveGateConnectionInfo>>>,
    process_module_config: Mutex<Option<DtResult<ProcessModuleConfig>>>,
    entity_ids: Mutex<HashMap<String, String>>,
    send_event_error: Mutex<Option<DynatraceApiError>>,
    calls: Mutex<Vec<String>>,
    events: Mutex<Vec<EventData>>,
}

impl MockDynatraceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scopes(self, token: &str, scopes: &[&str]) -> Self {
        self.scopes
            .lock()
            .unwrap()
            .insert(token.to_string(), Ok(scopes.iter().copied().collect()));
        self
    }

    pub fn with_scopes_error(self, token: &str, err: DynatraceApiError) -> Self {
        self.scopes
            .lock()
            .unwrap()
            .insert(token.to_string(), Err(err));
        self
    }

    pub fn with_oneagent_connection_info(self, info: DtResult<OneAgentConnectionInfo>) -> Self {
        *self.oneagent_connection_info.lock().unwrap() = Some(info);
        self
    }

    pub fn with_activegate_connection_info(self, info: DtResult<ActiveGateConnectionInfo>) -> Self {
        *self.activegate_connection_info.lock().unwrap() = Some(info);
        self
    }

    pub fn with_process_module_config(self, config: DtResult<ProcessModuleConfig>) -> Self {
        *self.process_module_config.lock().unwrap() = Some(config);
        self
    }

    pub fn with_entity_id(self, ip: &str, entity_id: &str) -> Self {
        self.entity_ids
            .lock()
            .unwrap()
            .insert(ip.to_string(), entity_id.to_string());
        self
    }

    pub fn with_send_event_error(self, err: DynatraceApiError) -> Self {
        *self.send_event_error.lock().unwrap() = Some(err);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(':').next() == Some(name))
            .count()
    }

    pub fn events(&self) -> Vec<EventData> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn unexpected(call: &str) -> DynatraceApiError {
    DynatraceApiError::Other(format!("unexpected call to {}", call))
}

#[async_trait]
impl DynatraceClient for MockDynatraceClient {
    async fn get_token_scopes(&self, token: &str) -> DtResult<TokenScopes> {
        self.record(format!("get_token_scopes:{}", token));
        self.scopes
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .unwrap_or_else(|| Err(unexpected("get_token_scopes")))
    }

    async fn get_oneagent_connection_info(&self) -> DtResult<OneAgentConnectionInfo> {
        self.record("get_oneagent_connection_info".to_string());
        self.oneagent_connection_info
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(unexpected("get_oneagent_connection_info")))
    }

    async fn get_activegate_connection_info(&self) -> DtResult<ActiveGateConnectionInfo> {
        self.record("get_activegate_connection_info".to_string());
        self.activegate_connection_info
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(unexpected("get_activegate_connection_info")))
    }

    async fn get_process_module_config(&self, prev_revision: u64) -> DtResult<ProcessModuleConfig> {
        self.record(format!("get_process_module_config:{}", prev_revision));
        self.process_module_config
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(unexpected("get_process_module_config")))
    }

    async fn get_entity_id_for_ip(&self, ip: &str) -> DtResult<String> {
        self.record(format!("get_entity_id_for_ip:{}", ip));
        self.entity_ids
            .lock()
            .unwrap()
            .get(ip)
            .cloned()
            .ok_or_else(|| DynatraceApiError::HostNotFound(ip.to_string()))
    }

    async fn send_event(&self, event: &EventData) -> DtResult<()> {
        self.record("send_event".to_string());
        if let Some(err) = self.send_event_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Builder handing out the same mock client for every DynaKube
pub struct StaticClientBuilder {
    client: Arc<MockDynatraceClient>,
    builds: Mutex<Vec<TokenSet>>,
}

impl StaticClientBuilder {
    pub fn new(client: Arc<MockDynatraceClient>) -> Self {
        Self {
            client,
            builds: Mutex::new(Vec::new()),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }
}

#[async_trait]
impl DynatraceClientBuilder for StaticClientBuilder {
    async fn build(
        &self,
        _dynakube: &DynaKube,
        tokens: &TokenSet,
    ) -> OperatorResult<Arc<dyn DynatraceClient>> {
        self.builds.lock().unwrap().push(tokens.clone());
        Ok(self.client.clone())
    }
}
