use std::collections::HashMap;

use opentelemetry::trace::TracerProvider as TracerProviderTrait;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How a process wants its logs and traces.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub service_name: String,
    /// OTLP/HTTP base URL; the exporter appends `/v1/traces`.
    pub otlp_endpoint: Option<String>,
    pub otlp_token: Option<String>,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Log to stderr so stdout stays free for command output.
    pub stderr: bool,
}

impl TracingOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            otlp_endpoint: None,
            otlp_token: None,
            default_filter: "info".to_string(),
            stderr: false,
        }
    }

    pub fn with_otlp(mut self, endpoint: Option<String>, token: Option<String>) -> Self {
        self.otlp_endpoint = endpoint.filter(|e| !e.trim().is_empty());
        self.otlp_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    pub fn log_to_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }
}

/// Keeps the trace exporter alive. Call [`TelemetryGuard::shutdown`] before
/// exit so batched spans are flushed.
#[must_use]
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    pub fn exporting(&self) -> bool {
        self.provider.is_some()
    }

    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "failed to flush traces");
            }
        }
    }
}

fn build_exporter(endpoint: &str, token: Option<&str>) -> Result<SpanExporter, String> {
    let mut headers = HashMap::new();
    if let Some(token) = token {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }
    SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_headers(headers)
        .build()
        .map_err(|e| e.to_string())
}

/// Install the global subscriber: an `EnvFilter`, a fmt layer and, when an
/// endpoint is configured and the exporter builds, an OpenTelemetry layer.
/// An exporter that fails to build degrades to local logging only.
pub fn init_tracing(options: &TracingOptions) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));
    let writer = if options.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(writer);

    let mut export_error = None;
    let provider = options.otlp_endpoint.as_deref().and_then(|endpoint| {
        match build_exporter(endpoint, options.otlp_token.as_deref()) {
            Ok(exporter) => Some(
                TracerProvider::builder()
                    .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                    .with_resource(Resource::new([KeyValue::new(
                        "service.name",
                        options.service_name.clone(),
                    )]))
                    .build(),
            ),
            Err(e) => {
                export_error = Some(e);
                None
            }
        }
    });
    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(options.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    if let Some(error) = export_error {
        tracing::warn!(%error, "OTLP exporter unavailable, logging locally only");
    } else if let Some(endpoint) = options.otlp_endpoint.as_deref().filter(|_| provider.is_some()) {
        tracing::info!(endpoint, service = %options.service_name, "OTLP tracing enabled");
    }
    TelemetryGuard { provider }
}
