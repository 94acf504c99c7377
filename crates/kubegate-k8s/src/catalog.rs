use std::collections::HashMap;

use futures::future::join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kubegate_types::ResourceDescriptor;
use tracing::{debug, error, instrument, warn};

/// Discovers every listable resource kind the cluster serves
pub struct ResourceCatalog {
    client: kube::Client,
}

impl ResourceCatalog {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Walk the preferred version of the core API and of every group.
    ///
    /// Groups that fail to answer are logged and left out. Failing to list
    /// the core API or the groups themselves yields an empty map.
    #[instrument(skip_all)]
    pub async fn discover(&self) -> HashMap<String, ResourceDescriptor> {
        match self.fetch_resource_lists().await {
            Ok(lists) => {
                let resources = build_catalog(&lists);
                debug!(count = resources.len(), "Discovered API resources");
                resources
            }
            Err(e) => {
                error!(error = %e, "Failed to discover API resources");
                HashMap::new()
            }
        }
    }

    async fn fetch_resource_lists(&self) -> Result<Vec<APIResourceList>, kube::Error> {
        let mut lists = Vec::new();

        let core = self.client.list_core_api_versions().await?;
        if let Some(version) = core.versions.first() {
            lists.push(self.client.list_core_api_resources(version).await?);
        }

        let groups = self.client.list_api_groups().await?;
        let group_versions: Vec<String> = groups
            .groups
            .iter()
            .filter_map(|group| {
                group
                    .preferred_version
                    .as_ref()
                    .or_else(|| group.versions.first())
                    .map(|v| v.group_version.clone())
            })
            .collect();

        let group_lists = join_all(
            group_versions
                .iter()
                .map(|gv| self.client.list_api_group_resources(gv)),
        )
        .await;

        for (group_version, result) in group_versions.iter().zip(group_lists) {
            match result {
                Ok(list) => lists.push(list),
                Err(e) => warn!(group_version = %group_version, error = %e, "Skipping unavailable API group"),
            }
        }

        Ok(lists)
    }
}

/// Turn discovery lists into descriptors keyed by id.
///
/// Only resources supporting `list` are kept; subresources such as
/// `pods/log` are skipped.
pub fn build_catalog(lists: &[APIResourceList]) -> HashMap<String, ResourceDescriptor> {
    let mut resources = HashMap::new();

    for list in lists {
        for resource in &list.resources {
            if resource.name.contains('/') || !resource.verbs.iter().any(|v| v == "list") {
                continue;
            }

            let descriptor = ResourceDescriptor::from_discovery(
                &list.group_version,
                &resource.kind,
                &resource.name,
                resource.namespaced,
            );
            resources.entry(descriptor.id.clone()).or_insert(descriptor);
        }
    }

    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCluster, discovery_response, status_response};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;

    fn resource(name: &str, kind: &str, verbs: &[&str]) -> APIResource {
        APIResource {
            name: name.to_string(),
            kind: kind.to_string(),
            namespaced: true,
            singular_name: kind.to_lowercase(),
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_catalog_filters_verbs_and_subresources() {
        let lists = vec![APIResourceList {
            group_version: "v1".to_string(),
            resources: vec![
                resource("pods", "Pod", &["get", "list"]),
                resource("pods/log", "Pod", &["get"]),
                resource("bindings", "Binding", &["create"]),
            ],
        }];

        let catalog = build_catalog(&lists);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog["pod"].path, "/api/v1");
    }

    #[tokio::test]
    async fn test_discover() {
        let (client, _cluster) = MockCluster::start(|request| {
            discovery_response(request.path()).unwrap_or_else(|| status_response(404, "NotFound", "not found"))
        });

        let catalog = ResourceCatalog::new(client).discover().await;

        let mut ids: Vec<&str> = catalog.keys().map(String::as_str).collect();
        ids.sort();
        assert_eq!(
            ids,
            vec![
                "daemonset.apps",
                "deployment.apps",
                "namespace",
                "node",
                "nodemetrics.metrics.k8s.io",
                "pod",
                "podmetrics.metrics.k8s.io",
            ]
        );
        assert!(!catalog["node"].namespaced);
        assert_eq!(catalog["podmetrics.metrics.k8s.io"].path, "/apis/metrics.k8s.io/v1beta1");
        assert_eq!(catalog["podmetrics.metrics.k8s.io"].plural_name, "pods");
    }

    #[tokio::test]
    async fn test_unavailable_group_is_skipped() {
        let (client, _cluster) = MockCluster::start(|request| {
            if request.path() == "/apis/apps/v1" {
                return status_response(503, "ServiceUnavailable", "unavailable");
            }
            discovery_response(request.path()).unwrap_or_else(|| status_response(404, "NotFound", "not found"))
        });

        let catalog = ResourceCatalog::new(client).discover().await;
        assert!(catalog.contains_key("pod"));
        assert!(catalog.contains_key("node"));
        assert!(catalog.contains_key("podmetrics.metrics.k8s.io"));
        assert!(!catalog.contains_key("deployment.apps"));
    }

    #[tokio::test]
    async fn test_core_discovery_failure_yields_empty_catalog() {
        let (client, _cluster) = MockCluster::start(|request| {
            if request.path() == "/api" {
                return status_response(503, "ServiceUnavailable", "unavailable");
            }
            discovery_response(request.path()).unwrap_or_else(|| status_response(404, "NotFound", "not found"))
        });

        assert!(ResourceCatalog::new(client).discover().await.is_empty());
    }
}
