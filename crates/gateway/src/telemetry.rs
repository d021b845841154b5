//! Logging, trace export and the Prometheus endpoint

use asynx_common::config::AppConfig;
use asynx_common::metrics::{LATENCY_BUCKETS, METRICS_PREFIX, UPSTREAM_BUCKETS};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the span exporter alive; call `shutdown` before exit to flush
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to flush trace exporter");
            }
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `observability.log_level`. Spans go to the OTLP
/// endpoint only when `observability.otel_endpoint` is set; the error
/// tracking DSN is a separate setting and no exporter is built from it.
pub fn init_tracing(config: &AppConfig) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.observability.log_level))?;

    let provider = match config.observability.otel_endpoint.as_deref() {
        Some(endpoint) if !endpoint.trim().is_empty() => Some(tracer_provider(config, endpoint)?),
        _ => None,
    };
    let otel = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer()
            .with_tracer(provider.tracer(config.observability.service_name.clone()))
    });

    let registry = tracing_subscriber::registry().with(filter).with(otel);
    if config.json_logging() {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }

    if config.observability.sentry_dsn.is_some() {
        info!("SENTRY_DSN is set; error reporting stays in the log stream");
    }

    Ok(TelemetryGuard { provider })
}

fn tracer_provider(config: &AppConfig, endpoint: &str) -> anyhow::Result<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.observability.service_name.clone()),
        KeyValue::new("deployment.environment", config.environment.as_str()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(opentelemetry_sdk::trace::Config::default().with_resource(resource))
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(provider)
}

/// Serve `/metrics` on the configured port; port 0 disables the exporter
pub fn init_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let port = config.observability.metrics_port;
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)));
    for name in ["request", "retrieval"] {
        builder = builder.set_buckets_for_metric(
            Matcher::Full(format!("{}_{}_duration_seconds", METRICS_PREFIX, name)),
            LATENCY_BUCKETS,
        )?;
    }
    for name in ["generation", "embedding", "ingestion"] {
        builder = builder.set_buckets_for_metric(
            Matcher::Full(format!("{}_{}_duration_seconds", METRICS_PREFIX, name)),
            UPSTREAM_BUCKETS,
        )?;
    }
    builder.install()?;

    info!(port = port, "Metrics exporter listening");
    Ok(())
}
