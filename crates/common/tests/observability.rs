use common::config::{LogFormat, Observability};
use metrics_exporter_prometheus::PrometheusBuilder;

fn settings(log_format: LogFormat) -> Observability {
    Observability {
        prometheus_port: None,
        log_format,
        otlp_endpoint: None,
    }
}

#[test]
fn error_events_counter_increments_on_error_event() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let (dispatch, otel_guard) =
            common::observability::build_dispatch("test-service", "info", &settings(LogFormat::Json));
        assert!(otel_guard.is_none());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::error!(wallet = "W1", "refresh failed");
        });
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("tradestats_error_events_total"),
        "expected tradestats_error_events_total in rendered metrics, got:\n{rendered}"
    );
}

#[test]
fn text_format_dispatch_does_not_count_info_events() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let (dispatch, _guard) =
            common::observability::build_dispatch("test-service", "info", &settings(LogFormat::Text));
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("cache warmed");
        });
    });

    assert!(!handle.render().contains("tradestats_error_events_total"));
}
