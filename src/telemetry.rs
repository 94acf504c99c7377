//! Tracing subscriber setup driven by the `[telemetry]` config section

use std::io::IsTerminal;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, OtlpProtocol, TelemetryConfig};

/// Flushes exported spans when dropped
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush spans: {e}");
            }
        }
    }
}

/// OTLP collector spans are sent to; `endpoint: None` defers to the
/// exporter's own environment lookup
#[derive(Debug, PartialEq)]
struct SpanTarget {
    endpoint: Option<String>,
    protocol: OtlpProtocol,
}

impl LogFormat {
    fn is_pretty(self, terminal: bool) -> bool {
        match self {
            LogFormat::Auto => terminal,
            LogFormat::Pretty => true,
            LogFormat::Json => false,
        }
    }
}

/// `--log-level`, then `RUST_LOG`, then the configured filter, then `info`
fn filter_directives(cli: Option<Level>, env: Option<String>, configured: Option<&str>) -> String {
    match (cli, env.filter(|v| !v.trim().is_empty()), configured) {
        (Some(level), _, _) => level.as_str().to_lowercase(),
        (None, Some(env), _) => env,
        (None, None, Some(configured)) => configured.to_string(),
        (None, None, None) => Level::INFO.as_str().to_lowercase(),
    }
}

fn span_target(config: &TelemetryConfig, env_endpoint_set: bool) -> Option<SpanTarget> {
    match &config.otlp_endpoint {
        Some(endpoint) => Some(SpanTarget {
            endpoint: Some(endpoint.clone()),
            protocol: config.otlp_protocol,
        }),
        None if env_endpoint_set => Some(SpanTarget {
            endpoint: None,
            protocol: config.otlp_protocol,
        }),
        None => None,
    }
}

fn env_endpoint_set() -> bool {
    [
        opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT,
        opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
    ]
    .iter()
    .any(|name| std::env::var_os(name).is_some())
}

fn tracer_provider(config: &TelemetryConfig, target: &SpanTarget) -> Result<SdkTracerProvider> {
    let exporter = match target.protocol {
        OtlpProtocol::Grpc => {
            let mut builder = SpanExporter::builder().with_tonic();
            if let Some(endpoint) = &target.endpoint {
                builder = builder.with_endpoint(endpoint.clone());
            }
            builder.build()
        }
        OtlpProtocol::Http => {
            let mut builder = SpanExporter::builder().with_http();
            if let Some(endpoint) = &target.endpoint {
                builder = builder.with_endpoint(endpoint.clone());
            }
            builder.build()
        }
    }
    .context("Failed to build the OTLP span exporter")?;

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// Install the global subscriber.
///
/// Console output goes to stderr. The W3C trace context propagator is always
/// installed so proxied requests carry `traceparent`.
pub fn init(config: &TelemetryConfig, log_level: Option<Level>) -> Result<TelemetryGuard> {
    let directives = filter_directives(
        log_level,
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        config.filter.as_deref(),
    );
    let filter = EnvFilter::try_new(&directives).with_context(|| format!("Invalid log filter {directives:?}"))?;

    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let console = if config.format.is_pretty(std::io::stderr().is_terminal()) {
        console.pretty().boxed()
    } else {
        console.json().boxed()
    };

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let provider = span_target(config, env_endpoint_set())
        .map(|target| tracer_provider(config, &target))
        .transpose()?;

    let spans = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer()
            .with_error_records_to_exceptions(true)
            .with_tracer(provider.tracer(config.service_name.clone()))
    });
    if let Some(provider) = &provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(spans)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(TelemetryGuard { provider })
}
