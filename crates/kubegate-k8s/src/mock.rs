//! In-process stand-in for the Kubernetes API server.
//!
//! Builds a [`kube::Client`] on top of a `tower-test` mock service. Every
//! request is recorded and answered by a caller supplied handler, so tests can
//! assert on paths, query strings and impersonation headers.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Response, StatusCode, Uri};
use kube::client::Body;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

/// A request as it reached the mock API server
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Decoded value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.uri.query()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then(|| {
                urlencoding::decode(&value.replace('+', " "))
                    .map(|v| v.into_owned())
                    .unwrap_or_default()
            })
        })
    }

    /// All values of a header, in order
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }
}

/// Handle to a running mock API server; aborts it on drop
pub struct MockCluster {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl MockCluster {
    /// Start serving requests with `handler` and return a client talking to it
    pub fn start<F>(handler: F) -> (kube::Client, MockCluster)
    where
        F: Fn(&RecordedRequest) -> Response<Body> + Send + Sync + 'static,
    {
        let (service, mut handle) = tower_test::mock::pair::<http::Request<Body>, Response<Body>>();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let task = tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                let (parts, body) = request.into_parts();
                let body = body.collect_bytes().await.unwrap_or_default();
                let request = RecordedRequest {
                    method: parts.method,
                    uri: parts.uri,
                    headers: parts.headers,
                    body,
                };

                let response = handler(&request);
                recorded.lock().push(request);
                send.send_response(response);
            }
        });

        (
            kube::Client::new(service, "default"),
            MockCluster { requests, task },
        )
    }

    /// A client whose every request fails at the transport level
    pub fn unreachable() -> kube::Client {
        let (service, handle) = tower_test::mock::pair::<http::Request<Body>, Response<Body>>();
        drop(handle);
        kube::Client::new(service, "default")
    }

    /// Everything received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Received requests whose path equals `path`
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path() == path)
            .cloned()
            .collect()
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn json_response(status: StatusCode, value: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string().into_bytes()))
        .unwrap()
}

pub fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(text.as_bytes().to_vec()))
        .unwrap()
}

/// A Kubernetes `Status` failure body with the given code
pub fn status_response(code: u16, reason: &str, message: &str) -> Response<Body> {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(
        status,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code,
        }),
    )
}

fn api_resource(name: &str, kind: &str, namespaced: bool) -> Value {
    json!({
        "name": name,
        "singularName": kind.to_lowercase(),
        "namespaced": namespaced,
        "kind": kind,
        "verbs": ["get", "list", "watch"],
    })
}

fn resource_list(group_version: &str, resources: Vec<Value>) -> Value {
    json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": group_version,
        "resources": resources,
    })
}

/// Discovery answers of a small cluster: core `v1`, `apps/v1` and
/// `metrics.k8s.io/v1beta1`. Returns `None` for any other path.
pub fn discovery_response(path: &str) -> Option<Response<Body>> {
    let body = match path {
        "/api" => json!({
            "kind": "APIVersions",
            "versions": ["v1"],
            "serverAddressByClientCIDRs": [],
        }),
        "/api/v1" => resource_list(
            "v1",
            vec![
                api_resource("pods", "Pod", true),
                api_resource("pods/log", "Pod", true),
                api_resource("namespaces", "Namespace", false),
                api_resource("nodes", "Node", false),
            ],
        ),
        "/apis" => json!({
            "kind": "APIGroupList",
            "apiVersion": "v1",
            "groups": [
                {
                    "name": "apps",
                    "versions": [{"groupVersion": "apps/v1", "version": "v1"}],
                    "preferredVersion": {"groupVersion": "apps/v1", "version": "v1"},
                },
                {
                    "name": "metrics.k8s.io",
                    "versions": [{"groupVersion": "metrics.k8s.io/v1beta1", "version": "v1beta1"}],
                    "preferredVersion": {"groupVersion": "metrics.k8s.io/v1beta1", "version": "v1beta1"},
                },
            ],
        }),
        "/apis/apps/v1" => resource_list(
            "apps/v1",
            vec![
                api_resource("deployments", "Deployment", true),
                api_resource("deployments/scale", "Scale", true),
                api_resource("daemonsets", "DaemonSet", true),
            ],
        ),
        "/apis/metrics.k8s.io/v1beta1" => resource_list(
            "metrics.k8s.io/v1beta1",
            vec![
                api_resource("pods", "PodMetrics", true),
                api_resource("nodes", "NodeMetrics", false),
            ],
        ),
        _ => return None,
    };

    Some(json_response(StatusCode::OK, body))
}

/// A server-side `Table` response with `rows` of `(namespace, name, cells)`
pub fn table_response(columns: &[(&str, i64)], rows: &[(&str, &str, Vec<Value>)]) -> Response<Body> {
    let column_definitions: Vec<Value> = columns
        .iter()
        .map(|(name, priority)| {
            json!({
                "name": name,
                "type": "string",
                "format": "",
                "description": "",
                "priority": priority,
            })
        })
        .collect();

    let rows: Vec<Value> = rows
        .iter()
        .map(|(namespace, name, cells)| {
            json!({
                "cells": cells,
                "object": {
                    "kind": "PartialObjectMetadata",
                    "apiVersion": "meta.k8s.io/v1",
                    "metadata": {"namespace": namespace, "name": name},
                },
            })
        })
        .collect();

    json_response(
        StatusCode::OK,
        json!({
            "kind": "Table",
            "apiVersion": "meta.k8s.io/v1",
            "metadata": {},
            "columnDefinitions": column_definitions,
            "rows": rows,
        }),
    )
}

/// A pod object with the given regular and init containers
pub fn pod_json(namespace: &str, name: &str, containers: &[&str], init_containers: &[&str]) -> Value {
    let named = |names: &[&str]| -> Vec<Value> {
        names
            .iter()
            .map(|n| json!({"name": n, "image": "busybox"}))
            .collect()
    };

    json!({
        "kind": "Pod",
        "apiVersion": "v1",
        "metadata": {"namespace": namespace, "name": name},
        "spec": {
            "containers": named(containers),
            "initContainers": named(init_containers),
        },
    })
}
