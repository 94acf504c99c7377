use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::AsyncBufReadExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use kube::api::LogParams;
use kube::core::Request;
use kubegate_k8s::{GatewayError, KubeClient, PodResolver, impersonate};
use kubegate_types::{Identity, LogLine, LogsQuery, TimeRange};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::filter::LineFilter;
use crate::parser::LogParser;
use crate::sink::LogSink;

/// Window of a batch query that does not name one
pub fn default_time_range() -> TimeRange {
    TimeRange::last(Duration::hours(1))
}

/// Log stream of a single pod
struct PodStream {
    client: KubeClient,
    identity: Identity,
    namespace: String,
    pod: String,
    params: LogParams,
    filter: Arc<LineFilter>,
    cancel: CancellationToken,
}

impl PodStream {
    /// Read lines until the stream ends, the token is cancelled or `emit`
    /// resolves to false. Fails only when the stream can not be opened.
    async fn run<F, Fut>(self, mut emit: F) -> Result<(), GatewayError>
    where
        F: FnMut(LogLine) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut request = Request::new(Pod::url_path(&(), Some(&self.namespace)))
            .logs(&self.pod, &self.params)?;
        impersonate::apply(request.headers_mut(), &self.identity)?;

        let stream = self.client.client().request_stream(request).await?;
        futures::pin_mut!(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(pod = %self.pod, "Log stream cancelled");
                    break;
                }

                result = stream.read_until(b'\n', &mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(_) => {
                            // Invalid UTF-8 is replaced, never fatal to the stream
                            let raw = String::from_utf8_lossy(&buf);
                            let raw = raw.trim_end_matches(['\n', '\r']);
                            if raw.is_empty() {
                                continue;
                            }

                            let Some(line) = LogParser::parse(raw, &self.pod) else {
                                warn!(pod = %self.pod, line = %raw, "Skipping log line without timestamp");
                                continue;
                            };

                            if !self.filter.matches(&line) {
                                continue;
                            }

                            tokio::select! {
                                biased;
                                _ = self.cancel.cancelled() => break,
                                keep = emit(line) => if !keep {
                                    break;
                                },
                            }
                        }
                        Err(e) => {
                            warn!(pod = %self.pod, error = %e, "Log stream interrupted");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Collects logs of every pod behind a pod or workload
#[derive(Clone)]
pub struct LogAggregator {
    client: KubeClient,
    resolver: PodResolver,
}

impl LogAggregator {
    pub fn new(client: KubeClient) -> Self {
        Self {
            resolver: PodResolver::new(client.clone()),
            client,
        }
    }

    /// Fetch a bounded batch of log lines, ordered by timestamp.
    ///
    /// Pods whose stream can not be opened are skipped.
    #[instrument(skip(self, identity, query), fields(user = %identity.user, resource = %query.resource, name = %query.name))]
    pub async fn fetch_logs(&self, identity: &Identity, query: &LogsQuery) -> Result<Vec<LogLine>, GatewayError> {
        let time_range = query.time_range.unwrap_or_else(default_time_range);
        let filter = Arc::new(LineFilter::new(&query.filter)?.with_time_range(time_range));

        let group = self
            .resolver
            .resolve(identity, &query.resource, &query.namespace, &query.name)
            .await?;

        let params = LogParams {
            container: non_empty(&query.container),
            previous: query.previous,
            timestamps: true,
            tail_lines: (query.tail > 0).then_some(query.tail),
            since_seconds: since_seconds(time_range.from, Utc::now()),
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();
        for (index, pod) in group.pods.iter().enumerate() {
            let stream = self.pod_stream(identity, &query.namespace, pod, params.clone(), &filter, &cancel);

            set.spawn(async move {
                let pod = stream.pod.clone();
                let mut lines = Vec::new();
                let result = stream
                    .run(|line| {
                        lines.push(line);
                        async { true }
                    })
                    .await;
                (index, pod, result.map(|_| lines))
            });
        }

        let mut per_pod: Vec<Vec<LogLine>> = vec![Vec::new(); group.pods.len()];
        while let Some(joined) = set.join_next().await {
            match joined? {
                (index, _, Ok(lines)) => per_pod[index] = lines,
                (_, pod, Err(e)) => warn!(pod = %pod, error = %e, "Failed to open log stream"),
            }
        }

        let mut lines: Vec<LogLine> = per_pod.into_iter().flatten().collect();
        lines.sort_by_key(|line| line.timestamp);
        debug!(count = lines.len(), pods = group.pods.len(), "Fetched logs");

        Ok(lines)
    }

    /// Follow the logs of every pod and push matching lines into `sink` until
    /// all streams end or `cancel` fires.
    ///
    /// A failing sink stops only the pod stream that fed it.
    #[instrument(skip(self, identity, query, sink, cancel), fields(user = %identity.user, resource = %query.resource, name = %query.name))]
    pub async fn stream_logs<S: LogSink>(
        &self,
        identity: &Identity,
        query: &LogsQuery,
        sink: S,
        cancel: CancellationToken,
    ) -> Result<(), GatewayError> {
        let filter = Arc::new(LineFilter::new(&query.filter)?);

        let group = self
            .resolver
            .resolve(identity, &query.resource, &query.namespace, &query.name)
            .await?;

        let params = LogParams {
            follow: true,
            container: non_empty(&query.container),
            timestamps: true,
            tail_lines: (query.tail > 0).then_some(query.tail),
            ..Default::default()
        };

        // Dropping this future stops every pod stream
        let cancel = cancel.child_token();
        let _guard = cancel.clone().drop_guard();

        let mut set = JoinSet::new();
        for pod in &group.pods {
            let stream = self.pod_stream(identity, &query.namespace, pod, params.clone(), &filter, &cancel);
            let sink = sink.clone();

            set.spawn(async move {
                let pod = stream.pod.clone();
                let result = stream
                    .run(|line| {
                        let sink = sink.clone();
                        let pod = pod.clone();
                        async move {
                            match sink.send(line).await {
                                Ok(()) => true,
                                Err(e) => {
                                    debug!(pod = %pod, error = %e, "Stopping pod stream");
                                    false
                                }
                            }
                        }
                    })
                    .await;

                if let Err(e) = result {
                    warn!(pod = %pod, error = %e, "Failed to open log stream");
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Log stream task failed");
            }
        }

        debug!("All log streams closed");
        Ok(())
    }

    fn pod_stream(
        &self,
        identity: &Identity,
        namespace: &str,
        pod: &str,
        params: LogParams,
        filter: &Arc<LineFilter>,
        cancel: &CancellationToken,
    ) -> PodStream {
        PodStream {
            client: self.client.clone(),
            identity: identity.clone(),
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            params,
            filter: Arc::clone(filter),
            cancel: cancel.child_token(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Server-side lower bound covering everything after `from`
fn since_seconds(from: DateTime<Utc>, now: DateTime<Utc>) -> Option<i64> {
    let seconds = (now - from).num_seconds();
    (seconds > 0).then_some(seconds + 1)
}
