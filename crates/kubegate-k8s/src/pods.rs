use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::Resource;
use kube::api::{GetParams, ListParams};
use kube::core::Request;
use kubegate_types::{Identity, PodGroup};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::client::KubeClient;
use crate::error::GatewayError;

/// What a resource id resolves to when looking for pods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkloadKind {
    /// The object is a pod itself
    Pod,
    /// The object selects pods through `spec.selector`
    Controller,
}

impl WorkloadKind {
    fn for_resource(id: &str) -> Self {
        if id == "pod" { Self::Pod } else { Self::Controller }
    }
}

/// Minimal view of a workload: only its pod selector matters
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkloadObject {
    spec: WorkloadSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkloadSpec {
    selector: Option<LabelSelector>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PodList {
    items: Vec<Pod>,
}

/// Finds the pods and container names behind a pod or a workload
#[derive(Clone)]
pub struct PodResolver {
    client: KubeClient,
}

impl PodResolver {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }

    /// Resolve `name` of resource `resource_id` in `namespace`.
    ///
    /// For workloads, the container names are taken from the first matching
    /// pod only.
    #[instrument(skip(self, identity), fields(user = %identity.user))]
    pub async fn resolve(
        &self,
        identity: &Identity,
        resource_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<PodGroup, GatewayError> {
        let resource = self.client.resource(resource_id).await?;

        let request = Request::new(resource.collection_path(Some(namespace)))
            .get(name, &GetParams::default())?;
        let object = self.client.send_text(identity, request).await?;

        match WorkloadKind::for_resource(&resource.id) {
            WorkloadKind::Pod => {
                let pod: Pod = serde_json::from_str(&object)?;
                Ok(PodGroup {
                    pods: vec![name.to_string()],
                    containers: container_names(&pod),
                })
            }
            WorkloadKind::Controller => {
                let workload: WorkloadObject = serde_json::from_str(&object)?;
                let selector = workload.spec.selector.ok_or_else(|| {
                    GatewayError::InvalidSelector(format!("{} {} has no pod selector", resource.kind, name))
                })?;
                let selector = format_label_selector(&selector)?;

                let request = Request::new(Pod::url_path(&(), Some(namespace)))
                    .list(&ListParams::default().labels(&selector))?;
                let pods: PodList = serde_json::from_str(&self.client.send_text(identity, request).await?)?;
                debug!(selector = %selector, pods = pods.items.len(), "Resolved workload pods");

                Ok(PodGroup {
                    pods: pods
                        .items
                        .iter()
                        .filter_map(|pod| pod.metadata.name.clone())
                        .collect(),
                    containers: pods.items.first().map(container_names).unwrap_or_default(),
                })
            }
        }
    }
}

/// Regular containers, then init containers, without duplicates
fn container_names(pod: &Pod) -> Vec<String> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };

    let mut names: Vec<String> = Vec::new();
    let init = spec.init_containers.iter().flatten();
    for container in spec.containers.iter().chain(init) {
        if !names.contains(&container.name) {
            names.push(container.name.clone());
        }
    }
    names
}

/// Render a label selector in the `key=value,key in (a,b)` string syntax.
///
/// Requirements are sorted by key; an empty selector selects everything.
pub fn format_label_selector(selector: &LabelSelector) -> Result<String, GatewayError> {
    let mut requirements: Vec<(String, String)> = Vec::new();

    for (key, value) in selector.match_labels.iter().flatten() {
        requirements.push((key.clone(), format!("{}={}", key, value)));
    }

    for expression in selector.match_expressions.iter().flatten() {
        let key = &expression.key;
        let mut values = expression.values.clone().unwrap_or_default();
        values.sort();

        let requirement = match expression.operator.as_str() {
            "In" if !values.is_empty() => format!("{} in ({})", key, values.join(",")),
            "NotIn" if !values.is_empty() => format!("{} notin ({})", key, values.join(",")),
            "Exists" if values.is_empty() => key.clone(),
            "DoesNotExist" if values.is_empty() => format!("!{}", key),
            operator => {
                return Err(GatewayError::InvalidSelector(format!(
                    "unsupported requirement {} {} {:?}",
                    key, operator, values
                )));
            }
        };
        requirements.push((key.clone(), requirement));
    }

    requirements.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(requirements
        .into_iter()
        .map(|(_, requirement)| requirement)
        .collect::<Vec<_>>()
        .join(","))
}
