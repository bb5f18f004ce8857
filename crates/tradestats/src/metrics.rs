use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "tradestats_cache_requests_total",
        "Wallet data requests by outcome (hit, miss, coalesced)."
    );
    describe_gauge!(
        "tradestats_cache_entries",
        "Wallet snapshots currently held in the cache."
    );
    describe_counter!(
        "tradestats_source_fetches_total",
        "Trade history fetches by source and status."
    );
    describe_histogram!(
        "tradestats_source_fetch_latency_ms",
        "Trade history fetch latency in milliseconds."
    );
    describe_counter!(
        "tradestats_aggregation_skipped_total",
        "Trades left out of aggregation, by reason."
    );
    describe_counter!(
        "tradestats_error_events_total",
        "ERROR-level log events."
    );
}

/// Installs the global recorder and serves `/metrics` on `port`. Must be
/// called from within a Tokio runtime.
pub fn install_prometheus(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}
