//! Query dispatch: one handler per query type

use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use http::HeaderMap;
use kubegate_k8s::{GatewayError, KubeClient, PodResolver, TableFetcher};
use kubegate_logs::{LogAggregator, LogSink};
use kubegate_types::{
    ContainersQuery, FilterSpec, Identity, LogLine, LogsQuery, Query, QueryResponse, ResourceDescriptor,
    ResourcesQuery, Table,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::ServerError;
use crate::identity::IdentityResolver;
use crate::proxy::ImpersonatingProxy;

/// Everything a query needs, wired to one cluster client
#[derive(Clone)]
pub struct Gateway {
    client: KubeClient,
    tables: TableFetcher,
    pods: PodResolver,
    logs: LogAggregator,
    proxy: ImpersonatingProxy,
    identity: Arc<dyn IdentityResolver>,
}

impl Gateway {
    pub fn new(client: KubeClient, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            tables: TableFetcher::new(client.clone()),
            pods: PodResolver::new(client.clone()),
            logs: LogAggregator::new(client.clone()),
            proxy: ImpersonatingProxy::new(client.client().clone()),
            client,
            identity,
        }
    }

    pub fn client(&self) -> &KubeClient {
        &self.client
    }

    pub fn proxy(&self) -> &ImpersonatingProxy {
        &self.proxy
    }

    pub fn identity_resolver(&self) -> Arc<dyn IdentityResolver> {
        Arc::clone(&self.identity)
    }

    /// Identity of an inbound request
    pub async fn identity(&self, headers: &HeaderMap) -> Result<Identity, ServerError> {
        Ok(self.identity.resolve(headers).await?)
    }

    /// Dispatch a query by its type
    #[instrument(skip_all, fields(user = %identity.user))]
    pub async fn query(&self, identity: &Identity, query: Query) -> Result<QueryResponse, GatewayError> {
        match query {
            Query::ResourceIds => Ok(QueryResponse::ResourceIds(self.resource_ids().await)),
            Query::Namespaces => Ok(QueryResponse::Names(self.namespaces().await?)),
            Query::Resources(query) => Ok(QueryResponse::Table(self.resources(identity, &query).await?)),
            Query::Containers(query) => Ok(QueryResponse::Names(self.containers(identity, &query).await?)),
            Query::Logs(query) => Ok(QueryResponse::Logs(self.logs(identity, &query).await?)),
        }
    }

    /// All known resource kinds, sorted by id
    pub async fn resource_ids(&self) -> Vec<ResourceDescriptor> {
        self.client.resources().await
    }

    pub async fn resource(&self, id: &str) -> Result<ResourceDescriptor, GatewayError> {
        self.client.resource(id).await
    }

    pub async fn namespaces(&self) -> Result<Vec<String>, GatewayError> {
        self.client.namespaces().await
    }

    pub async fn resources(&self, identity: &Identity, query: &ResourcesQuery) -> Result<Table, GatewayError> {
        let filter = FilterSpec::from_parameter(&query.parameter_name, &query.parameter_value);
        self.tables
            .fetch_and_merge(identity, &query.resource, &query.namespace, &filter, query.wide)
            .await
    }

    pub async fn containers(&self, identity: &Identity, query: &ContainersQuery) -> Result<Vec<String>, GatewayError> {
        let group = self
            .pods
            .resolve(identity, &query.resource, &query.namespace, &query.name)
            .await?;
        Ok(group.containers)
    }

    pub async fn logs(&self, identity: &Identity, query: &LogsQuery) -> Result<Vec<LogLine>, GatewayError> {
        self.logs.fetch_logs(identity, query).await
    }

    /// Check that `identity` may follow the logs asked for
    pub async fn subscribe_stream(&self, identity: &Identity, query: &LogsQuery) -> Result<(), ServerError> {
        let containers = ContainersQuery {
            resource: query.resource.clone(),
            namespace: query.namespace.clone(),
            name: query.name.clone(),
        };

        match self.containers(identity, &containers).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(user = %identity.user, resource = %query.resource, name = %query.name, error = %e, "Log stream subscription denied");
                Err(ServerError::PermissionDenied(e.to_string()))
            }
        }
    }

    /// Follow logs into `sink` until all streams end or `cancel` fires
    pub async fn run_stream<S: LogSink>(
        &self,
        identity: &Identity,
        query: &LogsQuery,
        sink: S,
        cancel: CancellationToken,
    ) -> Result<(), GatewayError> {
        let result = self.logs.stream_logs(identity, query, sink, cancel).await;
        debug!(resource = %query.resource, name = %query.name, "Log stream finished");
        result
    }

    /// Proxy a raw request to the API server as `identity`
    pub async fn forward(&self, identity: &Identity, target: &str, request: Request) -> Response {
        self.proxy.forward(identity, target, request).await
    }
}
