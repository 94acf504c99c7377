//! Reverse proxy to the cluster API server that acts as the caller's identity

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use kubegate_k8s::impersonate;
use kubegate_types::Identity;
use opentelemetry::propagation::Injector;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Body of every failed proxy response; details only go to the log
pub const PROXY_FAILURE: &str = "Client request failed";

/// Largest request body buffered for forwarding
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Never forwarded hop by hop, except `connection`/`upgrade` of upgrade requests
static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Credentials of the caller, replaced by the gateway's own
static CREDENTIALS: [HeaderName; 3] = [header::AUTHORIZATION, header::PROXY_AUTHORIZATION, header::COOKIE];

#[derive(Debug, Error)]
enum ProxyError {
    #[error("invalid target uri: {0}")]
    Uri(#[from] axum::http::uri::InvalidUri),
    #[error("invalid request: {0}")]
    Http(#[from] axum::http::Error),
    #[error("invalid impersonation header: {0}")]
    Identity(#[from] header::InvalidHeaderValue),
    #[error("failed to read request body: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Forwards arbitrary requests to the API server with impersonation headers
#[derive(Clone)]
pub struct ImpersonatingProxy {
    client: kube::Client,
    body_limit: usize,
}

impl ImpersonatingProxy {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            body_limit: MAX_REQUEST_BODY,
        }
    }

    /// Reject request bodies larger than `limit` bytes with `413`
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Forward `request` to `target` (path plus query) as `identity`.
    ///
    /// Never fails: errors become `502 Bad Gateway`.
    #[instrument(skip_all, fields(method = %request.method(), path = %target))]
    pub async fn forward(&self, identity: &Identity, target: &str, request: Request) -> Response {
        let method = request.method().clone();

        match self.try_forward(identity, target, request).await {
            Ok(response) => response,
            Err(e @ ProxyError::TooLarge(_)) => {
                warn!(method = %method, path = %target, user = %identity.user, error = %e, "Rejected proxy request");
                (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response()
            }
            Err(e) => {
                error!(
                    method = %method,
                    path = %target,
                    user = %identity.user,
                    groups = ?identity.groups,
                    error = %e,
                    "Proxy request failed"
                );
                (StatusCode::BAD_GATEWAY, PROXY_FAILURE).into_response()
            }
        }
    }

    async fn try_forward(&self, identity: &Identity, target: &str, mut request: Request) -> Result<Response, ProxyError> {
        let upgrade = is_upgrade(request.headers());
        let inbound_upgrade = upgrade.then(|| hyper::upgrade::on(&mut request));

        let uri: Uri = target.parse()?;
        let (parts, body) = request.into_parts();

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.body_limit) {
            return Err(ProxyError::TooLarge(self.body_limit));
        }

        let mut headers = forward_headers(&parts.headers, upgrade);
        impersonate::apply(&mut headers, identity)?;
        inject_trace_context(&mut headers);

        let body = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => return Err(ProxyError::TooLarge(self.body_limit)),
            Err(e) => return Err(ProxyError::Body(e)),
        };
        let mut outbound = http::Request::builder()
            .method(parts.method)
            .uri(uri)
            .body(kube::client::Body::from(body.to_vec()))?;
        *outbound.headers_mut() = headers;

        let mut response = self.client.send(outbound).await?;
        debug!(status = %response.status(), "Upstream responded");

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(inbound) = inbound_upgrade {
                let outbound = hyper::upgrade::on(&mut response);
                tokio::spawn(tunnel(inbound, outbound));
            }
        } else {
            for name in &HOP_BY_HOP {
                response.headers_mut().remove(name);
            }
        }

        Ok(response.map(Body::new))
    }
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Inbound headers that may travel upstream
fn forward_headers(inbound: &HeaderMap, upgrade: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound {
        let keep_for_upgrade = upgrade && (name == header::CONNECTION || name == header::UPGRADE);

        if name == header::HOST
            || name == header::CONTENT_LENGTH
            || CREDENTIALS.contains(name)
            || impersonate::is_impersonation_header(name)
            || (HOP_BY_HOP.contains(name) && !keep_for_upgrade)
        {
            continue;
        }
        headers.append(name, value.clone());
    }

    headers
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
            self.0.insert(name, value);
        }
    }
}

/// Write `traceparent`/`tracestate` of the current span
fn inject_trace_context(headers: &mut HeaderMap) {
    let context = tracing::Span::current().context();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&context, &mut HeaderInjector(headers));
    });
}

/// Copy bytes both ways between the upgraded client and upstream connections
async fn tunnel(inbound: OnUpgrade, outbound: OnUpgrade) {
    let (inbound, outbound) = match tokio::try_join!(inbound, outbound) {
        Ok(upgraded) => upgraded,
        Err(e) => {
            warn!(error = %e, "Connection upgrade failed");
            return;
        }
    };

    let mut inbound = TokioIo::new(inbound);
    let mut outbound = TokioIo::new(outbound);

    match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
        Ok((sent, received)) => debug!(sent, received, "Upgraded connection closed"),
        Err(e) => debug!(error = %e, "Upgraded connection closed with error"),
    }
}
