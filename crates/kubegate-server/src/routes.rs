//! HTTP API surface of the gateway

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use futures::Stream;
use kubegate_types::{LogLine, LogsQuery, Query, QueryResponse, ResourceDescriptor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::gateway::Gateway;

/// Prefix under which the API server is proxied
pub const PROXY_PREFIX: &str = "/proxy";

/// Log lines buffered per event stream before pod streams wait for the client
pub const STREAM_BUFFER: usize = 256;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/stream", post(stream))
        .route("/resources/{id}", get(resource))
        .route("/proxy/{*path}", any(proxy))
        .with_state(gateway)
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    match gateway.client().check_health().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            warn!(error = %e, "Cluster health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn query(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(query): Json<Query>,
) -> Result<Json<QueryResponse>, ServerError> {
    let identity = gateway.identity(&headers).await?;
    Ok(Json(gateway.query(&identity, query).await?))
}

async fn resource(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<String>,
) -> Result<Json<ResourceDescriptor>, ServerError> {
    Ok(Json(gateway.resource(&id).await?))
}

/// Follow logs as server-sent events, one `LogLine` per event
async fn stream(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(query): Json<LogsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let identity = gateway.identity(&headers).await?;
    gateway.subscribe_stream(&identity, &query).await?;

    let (tx, rx) = mpsc::channel::<LogLine>(STREAM_BUFFER);
    let cancel = CancellationToken::new();
    // Dropping the event stream (client went away) stops the pod streams
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        if let Err(e) = gateway.run_stream(&identity, &query, tx, cancel).await {
            warn!(error = %e, "Log stream failed");
        }
    });

    let events = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let line = rx.recv().await?;
        let event = Event::default().json_data(&line).unwrap_or_else(|e| {
            debug!(error = %e, "Failed to encode log line");
            Event::default().comment("unencodable log line")
        });
        Some((Ok(event), (rx, guard)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn proxy(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    let identity = match gateway.identity(request.headers()).await {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let target = proxy_target(&request, PROXY_PREFIX);
    gateway.forward(&identity, &target, request).await
}

/// Upstream path and query of an inbound request, without `prefix`
pub(crate) fn proxy_target(request: &Request, prefix: &str) -> String {
    let path = request.uri().path();
    let path = path.strip_prefix(prefix).unwrap_or(path);
    let path = if path.is_empty() { "/" } else { path };

    match request.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    }
}
