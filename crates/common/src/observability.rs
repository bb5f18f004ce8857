use std::borrow::Cow;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, Observability};

pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Flushes the global tracer provider when dropped.
pub struct OtelGuard {
    _private: (),
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Counts ERROR-level events into `tradestats_error_events_total`.
struct ErrorEventCounter;

impl<S> Layer<S> for ErrorEventCounter
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            metrics::counter!("tradestats_error_events_total").increment(1);
        }
    }
}

/// Build the process-wide `tracing` dispatcher.
///
/// - `RUST_LOG` wins over `default_level` when set
/// - log lines go to stderr as JSON or plain text per `settings.log_format`,
///   leaving stdout to command output
/// - ERROR events are counted as a metric
/// - spans are exported over OTLP/HTTP when `settings.otlp_endpoint` or
///   `OTEL_EXPORTER_OTLP_ENDPOINT` names a collector
///
/// OTLP export needs a running Tokio runtime.
pub fn build_dispatch(
    service_name: impl Into<Cow<'static, str>>,
    default_level: &str,
    settings: &Observability,
) -> (tracing::Dispatch, Option<OtelGuard>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (json_layer, text_layer) = match settings.log_format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_timer(tracing_subscriber::fmt::time::SystemTime)
                    .with_writer(std::io::stderr)
                    .json(),
            ),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    let endpoint = settings
        .otlp_endpoint
        .clone()
        .or_else(|| std::env::var(OTLP_ENDPOINT_ENV).ok())
        .filter(|e| !e.trim().is_empty());
    let tracer = endpoint.and_then(|endpoint| otlp_tracer(service_name.into(), endpoint));
    let guard = tracer.as_ref().map(|_| OtelGuard { _private: () });
    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(ErrorEventCounter)
        .with(otel_layer);

    (tracing::Dispatch::new(subscriber), guard)
}

/// Returns `None` when the exporter cannot be built; logging then runs
/// without trace export.
fn otlp_tracer(
    service_name: Cow<'static, str>,
    endpoint: String,
) -> Option<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .ok()?;

    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("tradestats");
    let _ = opentelemetry::global::set_tracer_provider(provider);
    Some(tracer)
}
