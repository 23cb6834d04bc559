//! Logging and tracing setup.
//!
//! Defaults to compact, human-readable output on stderr. Setting
//! `RALPH_LOG_FORMAT=json` switches the stderr layer to structured JSON.
//! With the `otel` feature and `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans and
//! events are additionally exported over OTLP. A separate, always-on
//! compact-format writer mirrors the same events to `.ralph/logs/audit.log`
//! so a human can `tail -f` the orchestrator without an OTEL collector.

use std::path::Path;

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Holds resources that must outlive the subscriber: the non-blocking audit
/// log writer and, with the `otel` feature enabled, the OTLP tracer
/// provider. Dropping this guard flushes buffered log lines and, if OTEL
/// export is active, shuts the exporter down cleanly.
pub struct TelemetryGuard {
    _audit_log_guard: tracing_appender::non_blocking::WorkerGuard,
    #[cfg(feature = "otel")]
    _otel_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

/// Initialize logging for the `ralph` CLI process.
///
/// `audit_log_path` receives a mirror of every event in a compact,
/// human-readable format, independent of the event bus's JSONL stream.
///
/// # Errors
/// Returns an error if the audit log's parent directory can't be created,
/// or (with `otel`) if the OTLP exporter fails to build.
pub fn init(audit_log_path: &Path) -> Result<TelemetryGuard> {
    if let Some(parent) = audit_log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let env_filter = EnvFilter::try_from_env("RALPH_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("the fallback filter directive is always valid");

    let stderr_json = std::env::var("RALPH_LOG_FORMAT").as_deref() == Ok("json");
    let stderr_layer = if stderr_json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    let file_appender = tracing_appender::rolling::never(
        audit_log_path.parent().unwrap_or_else(|| Path::new(".")),
        audit_log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("audit.log")),
    );
    let (non_blocking, audit_guard) = tracing_appender::non_blocking(file_appender);
    let audit_layer = fmt::layer().with_ansi(false).with_target(false).with_writer(non_blocking);

    let registry = Registry::default().with(env_filter).with(stderr_layer).with(audit_layer);

    #[cfg(feature = "otel")]
    let (registry, otel_provider) = {
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            let provider = build_otel_tracer(&endpoint)?;
            let tracer = opentelemetry::trace::TracerProvider::tracer(&provider, "ralph");
            (registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).boxed(), Some(provider))
        } else {
            (registry.boxed(), None)
        }
    };

    #[cfg(not(feature = "otel"))]
    let registry = registry;

    registry.try_init().map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;

    Ok(TelemetryGuard {
        _audit_log_guard: audit_guard,
        #[cfg(feature = "otel")]
        _otel_provider: otel_provider,
    })
}

#[cfg(feature = "otel")]
fn build_otel_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig as _;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;
    Ok(opentelemetry_sdk::trace::SdkTracerProvider::builder().with_batch_exporter(exporter).build())
}

trait BoxedLayerExt<S>: tracing_subscriber::Layer<S> + Sized
where
    S: tracing::Subscriber,
{
    fn boxed(self) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync + 'static>
    where
        Self: Send + Sync + 'static,
    {
        Box::new(self)
    }
}

impl<S, L> BoxedLayerExt<S> for L
where
    L: tracing_subscriber::Layer<S>,
    S: tracing::Subscriber,
{
}
