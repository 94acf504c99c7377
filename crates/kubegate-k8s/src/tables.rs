use std::sync::Arc;

use kubegate_types::{FilterSpec, Identity, ResourceDescriptor, Table};
use regex::Regex;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::client::KubeClient;
use crate::error::GatewayError;
use crate::jsonpath::JsonPathFilter;
use crate::merge::{RowFilter, TableFragment, TableMerger, TableResponse};

/// Asks for a server-side Table, falling back to plain JSON for old servers
pub const TABLE_ACCEPT: &str = "application/json;as=Table;v=v1;g=meta.k8s.io,application/json;as=Table;v=v1beta1;g=meta.k8s.io,application/json";

/// One list call of a fan-out
struct FetchTask {
    namespace: Option<String>,
    parameter: Option<(String, String)>,
}

/// Lists a resource across namespaces and parameter values, concurrently,
/// and merges the resulting tables
#[derive(Clone)]
pub struct TableFetcher {
    client: KubeClient,
}

impl TableFetcher {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }

    /// Fetch and merge the table of `resource_id`.
    ///
    /// `namespace` is a comma separated list; a `*` or empty entry lists all
    /// namespaces. The call fails only when every list call failed.
    #[instrument(skip(self, identity, filter), fields(user = %identity.user))]
    pub async fn fetch_and_merge(
        &self,
        identity: &Identity,
        resource_id: &str,
        namespace: &str,
        filter: &FilterSpec,
        wide: bool,
    ) -> Result<Table, GatewayError> {
        let resource = self.client.resource(resource_id).await?;

        let (row_filter, json_path) = match filter {
            FilterSpec::JsonPath(expression) => (
                RowFilter::JsonPath,
                Some(Arc::new(JsonPathFilter::parse(expression)?)),
            ),
            FilterSpec::Regex(pattern) => (RowFilter::NameRegex(Regex::new(pattern)?), None),
            FilterSpec::None | FilterSpec::Parameter { .. } => (RowFilter::All, None),
        };

        let tasks = plan_tasks(&resource, namespace, filter);
        let total = tasks.len();
        debug!(resource = %resource.id, tasks = total, "Fetching tables");

        let mut set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let client = self.client.clone();
            let resource = resource.clone();
            let identity = identity.clone();
            let json_path = json_path.clone();

            set.spawn(async move {
                let fragment =
                    fetch_fragment(&client, &identity, &resource, &task, json_path.as_deref()).await;
                (index, fragment)
            });
        }

        let mut results: Vec<Option<Result<TableFragment, GatewayError>>> =
            (0..total).map(|_| None).collect();
        let mut join_errors = Vec::new();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => join_errors.push(GatewayError::from(e)),
            }
        }

        let mut fragments = Vec::with_capacity(total);
        let mut first_error = None;
        for result in results.into_iter().flatten() {
            match result {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => {
                    warn!(resource = %resource.id, error = %e, "Failed to list resources");
                    first_error.get_or_insert(e);
                }
            }
        }

        if fragments.is_empty() {
            if let Some(e) = first_error.or_else(|| join_errors.into_iter().next()) {
                return Err(e);
            }
        }

        TableMerger::new(&resource, wide)
            .with_filter(row_filter)
            .merge(&fragments)
    }
}

/// Expand namespaces and parameter values into list calls, in result order
fn plan_tasks(resource: &ResourceDescriptor, namespace: &str, filter: &FilterSpec) -> Vec<FetchTask> {
    let namespaces: Vec<Option<String>> = if !resource.namespaced {
        vec![None]
    } else {
        namespace
            .split(',')
            .map(str::trim)
            .map(|ns| (!ns.is_empty() && ns != "*").then(|| ns.to_string()))
            .collect()
    };

    let parameters: Vec<Option<(String, String)>> = match filter {
        FilterSpec::Parameter { name, values } => values
            .iter()
            .map(|value| Some((name.clone(), value.clone())))
            .collect(),
        _ => vec![None],
    };

    namespaces
        .iter()
        .flat_map(|namespace| {
            parameters.iter().map(move |parameter| FetchTask {
                namespace: namespace.clone(),
                parameter: parameter.clone(),
            })
        })
        .collect()
}

async fn fetch_fragment(
    client: &KubeClient,
    identity: &Identity,
    resource: &ResourceDescriptor,
    task: &FetchTask,
    json_path: Option<&JsonPathFilter>,
) -> Result<TableFragment, GatewayError> {
    let path = resource.collection_path(task.namespace.as_deref());

    let uri = match &task.parameter {
        Some((name, value)) => format!(
            "{}?{}={}",
            path,
            urlencoding::encode(name),
            urlencoding::encode(value)
        ),
        None => path.clone(),
    };

    let body = client.get_text(identity, &uri, Some(TABLE_ACCEPT)).await?;
    let table: TableResponse = serde_json::from_str(&body)?;

    let json_path_matches = match json_path {
        Some(filter) => {
            let body = client.get_text(identity, &path, None).await?;
            let list: Value = serde_json::from_str(&body)?;
            Some(filter.matches(&list))
        }
        None => None,
    };

    Ok(TableFragment {
        table,
        json_path_matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCluster, discovery_response, json_response, status_response, table_response};
    use http::StatusCode;
    use serde_json::json;

    fn pod_table(namespace: &str, names: &[&str]) -> http::Response<kube::client::Body> {
        let rows: Vec<(&str, &str, Vec<Value>)> = names
            .iter()
            .map(|name| (namespace, *name, vec![json!(name), json!("1/1"), json!("node-1")]))
            .collect();
        table_response(&[("Name", 0), ("Ready", 0), ("Node", 1)], &rows)
    }

    fn fetcher<F>(handler: F) -> (TableFetcher, MockCluster)
    where
        F: Fn(&crate::mock::RecordedRequest) -> http::Response<kube::client::Body> + Send + Sync + 'static,
    {
        let (client, cluster) = MockCluster::start(move |request| {
            discovery_response(request.path()).unwrap_or_else(|| handler(request))
        });
        (TableFetcher::new(KubeClient::new(client)), cluster)
    }

    #[test]
    fn test_plan_tasks() {
        let pods = ResourceDescriptor::from_discovery("v1", "Pod", "pods", true);
        let filter = FilterSpec::from_parameter("labelSelector", "app=a||app=b");

        let tasks = plan_tasks(&pods, "default,prod", &filter);
        let planned: Vec<(Option<&str>, &str)> = tasks
            .iter()
            .map(|t| (t.namespace.as_deref(), t.parameter.as_ref().unwrap().1.as_str()))
            .collect();
        assert_eq!(
            planned,
            vec![
                (Some("default"), "app=a"),
                (Some("default"), "app=b"),
                (Some("prod"), "app=a"),
                (Some("prod"), "app=b"),
            ]
        );

        let nodes = ResourceDescriptor::from_discovery("v1", "Node", "nodes", false);
        let tasks = plan_tasks(&nodes, "default,prod", &FilterSpec::None);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].namespace.is_none());

        assert!(plan_tasks(&pods, "*", &FilterSpec::None)[0].namespace.is_none());
        assert!(plan_tasks(&pods, "", &FilterSpec::None)[0].namespace.is_none());

        let mixed: Vec<Option<String>> = plan_tasks(&pods, "*, default", &FilterSpec::None)
            .into_iter()
            .map(|t| t.namespace)
            .collect();
        assert_eq!(mixed, vec![None, Some("default".to_string())]);
    }

    #[tokio::test]
    async fn test_multi_namespace_merge_in_order() {
        let (fetcher, cluster) = fetcher(|request| match request.path() {
            "/api/v1/namespaces/default/pods" => pod_table("default", &["a", "b"]),
            "/api/v1/namespaces/prod/pods" => pod_table("prod", &["c"]),
            _ => status_response(404, "NotFound", "not found"),
        });

        let identity = Identity::new("alice", vec![]);
        let table = fetcher
            .fetch_and_merge(&identity, "pod", "default,prod", &FilterSpec::None, false)
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["Namespace", "Name", "Ready"]);
        assert_eq!(table.column("Namespace").unwrap(), vec!["default", "default", "prod"]);
        assert_eq!(table.column("Name").unwrap(), vec!["a", "b", "c"]);

        let listed = cluster.requests_to("/api/v1/namespaces/default/pods");
        assert_eq!(listed[0].header_values("accept"), vec![TABLE_ACCEPT]);
        assert_eq!(listed[0].header_values("impersonate-user"), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_all_namespaces_overlap_is_deduplicated() {
        let (fetcher, cluster) = fetcher(|request| match request.path() {
            "/api/v1/pods" => table_response(
                &[("Name", 0), ("Ready", 0), ("Node", 1)],
                &[
                    ("default", "a", vec![json!("a"), json!("1/1"), json!("node-1")]),
                    ("prod", "c", vec![json!("c"), json!("1/1"), json!("node-1")]),
                ],
            ),
            "/api/v1/namespaces/default/pods" => pod_table("default", &["a", "b"]),
            _ => status_response(404, "NotFound", "not found"),
        });

        let table = fetcher
            .fetch_and_merge(&Identity::default(), "pod", "*,default", &FilterSpec::None, false)
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["Namespace", "Name", "Ready"]);
        assert_eq!(table.column("Namespace").unwrap(), vec!["default", "prod", "default"]);
        assert_eq!(table.column("Name").unwrap(), vec!["a", "c", "b"]);
        assert_eq!(cluster.requests_to("/api/v1/pods").len(), 1);
        assert_eq!(cluster.requests_to("/api/v1/namespaces/default/pods").len(), 1);
    }

    #[tokio::test]
    async fn test_cluster_scoped_kind_has_no_namespace_column() {
        let (fetcher, cluster) = fetcher(|request| match request.path() {
            "/api/v1/nodes" => table_response(
                &[("Name", 0), ("Status", 0)],
                &[
                    ("", "node-1", vec![json!("node-1"), json!("Ready")]),
                    ("", "node-2", vec![json!("node-2"), json!("NotReady")]),
                ],
            ),
            _ => status_response(404, "NotFound", "not found"),
        });

        let table = fetcher
            .fetch_and_merge(&Identity::default(), "node", "default,prod", &FilterSpec::None, false)
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["Name", "Status"]);
        assert!(table.column("Namespace").is_none());
        assert_eq!(table.column("Name").unwrap(), vec!["node-1", "node-2"]);
        assert_eq!(cluster.requests_to("/api/v1/nodes").len(), 1);
        assert!(cluster.requests_to("/api/v1/namespaces/default/nodes").is_empty());
    }

    #[tokio::test]
    async fn test_parameter_values_are_fetched_separately() {
        let (fetcher, cluster) = fetcher(|request| {
            match request.query_param("labelSelector").as_deref() {
                Some("app=a") => pod_table("default", &["a-1", "shared"]),
                Some("app=b") => pod_table("default", &["shared", "b-1"]),
                _ => status_response(400, "BadRequest", "unexpected selector"),
            }
        });

        let filter = FilterSpec::from_parameter("labelSelector", "app=a||app=b");
        let table = fetcher
            .fetch_and_merge(&Identity::default(), "pod", "default", &filter, false)
            .await
            .unwrap();

        assert_eq!(table.column("Name").unwrap(), vec!["a-1", "shared", "b-1"]);
        assert_eq!(cluster.requests_to("/api/v1/namespaces/default/pods").len(), 2);
    }

    #[tokio::test]
    async fn test_json_path_filter() {
        let (fetcher, _cluster) = fetcher(|request| {
            if request.path() != "/apis/apps/v1/namespaces/default/deployments" {
                return status_response(404, "NotFound", "not found");
            }
            if request.header_values("accept") == vec![TABLE_ACCEPT] {
                table_response(
                    &[("Name", 0)],
                    &[
                        ("default", "echoserver", vec![json!("echoserver")]),
                        ("default", "web", vec![json!("web")]),
                    ],
                )
            } else {
                json_response(
                    StatusCode::OK,
                    json!({
                        "kind": "DeploymentList",
                        "items": [
                            {"metadata": {"namespace": "default", "name": "echoserver", "labels": {"app": "echoserver"}}},
                            {"metadata": {"namespace": "default", "name": "web", "labels": {"app": "web"}}},
                        ],
                    }),
                )
            }
        });

        let filter = FilterSpec::from_parameter("jsonPath", r#"{.items[?(@.metadata.labels.app=="echoserver")]}"#);
        let table = fetcher
            .fetch_and_merge(&Identity::default(), "deployment.apps", "default", &filter, false)
            .await
            .unwrap();

        assert_eq!(table.column("Name").unwrap(), vec!["echoserver"]);
    }

    #[tokio::test]
    async fn test_partial_failure_returns_survivors() {
        let (fetcher, _cluster) = fetcher(|request| match request.path() {
            "/api/v1/namespaces/default/pods" => pod_table("default", &["a"]),
            _ => status_response(403, "Forbidden", "forbidden"),
        });

        let table = fetcher
            .fetch_and_merge(&Identity::default(), "pod", "default,secret", &FilterSpec::None, false)
            .await
            .unwrap();
        assert_eq!(table.column("Name").unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_all_failing_returns_first_error() {
        let (fetcher, _cluster) = fetcher(|request| match request.path() {
            "/api/v1/namespaces/first/pods" => status_response(403, "Forbidden", "forbidden"),
            _ => status_response(500, "InternalError", "boom"),
        });

        let err = fetcher
            .fetch_and_merge(&Identity::default(), "pod", "first,second", &FilterSpec::None, false)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let (fetcher, _cluster) = fetcher(|_| status_response(404, "NotFound", "not found"));
        let err = fetcher
            .fetch_and_merge(&Identity::default(), "widget", "", &FilterSpec::None, false)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_regex_is_rejected() {
        let (fetcher, cluster) = fetcher(|_| status_response(404, "NotFound", "not found"));
        let filter = FilterSpec::Regex("(".to_string());
        let err = fetcher
            .fetch_and_merge(&Identity::default(), "pod", "", &filter, false)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidRegex(_)));
        assert!(cluster.requests_to("/api/v1/pods").is_empty());
    }
}
