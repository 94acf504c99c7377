//! Cluster connection shared by every gateway component

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kubegate_types::{Identity, ResourceDescriptor};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::ResourceCache;
use crate::catalog::ResourceCatalog;
use crate::error::GatewayError;
use crate::impersonate;

/// Where the gateway's own cluster credential comes from
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ClusterCredentials {
    /// Service account of the pod the gateway runs in
    #[default]
    InCluster,
    /// Kubeconfig file on disk, optionally pinned to a context
    Path {
        path: PathBuf,
        #[serde(default)]
        context: Option<String>,
    },
    /// Inline kubeconfig document
    Kubeconfig { kubeconfig: String },
}

impl fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InCluster => f.write_str("InCluster"),
            Self::Path { path, context } => f
                .debug_struct("Path")
                .field("path", path)
                .field("context", context)
                .finish(),
            Self::Kubeconfig { .. } => f.write_str("Kubeconfig { .. }"),
        }
    }
}

/// Kubernetes client wrapper holding the resource catalog cache
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
    cache: Arc<ResourceCache>,
}

impl KubeClient {
    /// Wrap an existing client; the catalog is discovered on first use
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            cache: Arc::new(ResourceCache::new()),
        }
    }

    /// Build a client from configured credentials and run discovery once
    #[instrument(skip_all, fields(credentials = ?credentials))]
    pub async fn connect(credentials: &ClusterCredentials) -> Result<Self, GatewayError> {
        let config = match credentials {
            ClusterCredentials::InCluster => kube::Config::incluster()?,
            ClusterCredentials::Path { path, context } => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                let options = KubeConfigOptions {
                    context: context.clone(),
                    ..Default::default()
                };
                kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?
            }
            ClusterCredentials::Kubeconfig { kubeconfig } => {
                let kubeconfig = Kubeconfig::from_yaml(kubeconfig)?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?
            }
        };

        info!(cluster_url = %config.cluster_url, "Connecting to cluster");
        let client = Self::new(kube::Client::try_from(config)?);

        if let Err(e) = client.refresh_cache().await {
            warn!(error = %e, "Initial resource discovery failed");
        }

        Ok(client)
    }

    pub fn client(&self) -> &kube::Client {
        &self.client
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Check if the API server answers with the gateway's own credential
    pub async fn check_health(&self) -> Result<(), GatewayError> {
        self.client.list_core_api_versions().await?;
        Ok(())
    }

    /// Names of all namespaces, as seen by the gateway itself
    pub async fn namespaces(&self) -> Result<Vec<String>, GatewayError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    /// Rediscover the catalog unless the cached snapshot is still valid.
    ///
    /// A failed or empty discovery leaves the previous snapshot in place.
    pub async fn refresh_cache(&self) -> Result<(), GatewayError> {
        if self.cache.is_valid() {
            return Ok(());
        }

        let resources = ResourceCatalog::new(self.client.clone()).discover().await;
        if resources.is_empty() {
            return Err(GatewayError::DiscoveryEmpty);
        }

        debug!(count = resources.len(), "Refreshed resource cache");
        self.cache.set_all(resources);
        Ok(())
    }

    /// All known resources, sorted by id
    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        if let Err(e) = self.refresh_cache().await {
            warn!(error = %e, "Serving stale resource catalog");
        }
        self.cache.all()
    }

    /// Look up a resource by id.
    ///
    /// Falls back to a stale snapshot when the refresh fails; the refresh error
    /// is returned only if the id is unknown there as well.
    pub async fn resource(&self, id: &str) -> Result<ResourceDescriptor, GatewayError> {
        let refreshed = self.refresh_cache().await;

        match self.cache.get(id) {
            Some(resource) => Ok(resource),
            None => Err(refreshed
                .err()
                .unwrap_or_else(|| GatewayError::NotFound(id.to_string()))),
        }
    }

    /// GET `uri` as `identity` and return the body text
    pub async fn get_text(
        &self,
        identity: &Identity,
        uri: &str,
        accept: Option<&str>,
    ) -> Result<String, GatewayError> {
        let mut request = http::Request::get(uri);
        if let Some(accept) = accept {
            request = request.header(http::header::ACCEPT, accept);
        }
        self.send_text(identity, request.body(Vec::new())?).await
    }

    /// Send a prepared request as `identity`
    pub async fn send_text(
        &self,
        identity: &Identity,
        mut request: http::Request<Vec<u8>>,
    ) -> Result<String, GatewayError> {
        impersonate::apply(request.headers_mut(), identity)?;
        Ok(self.client.request_text(request).await?)
    }
}
