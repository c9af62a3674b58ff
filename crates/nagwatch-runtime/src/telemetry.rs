//! Prometheus exporter for the pipeline's counters and gauges.

use std::net::SocketAddr;

use anyhow::Context;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the global recorder and serve `/metrics` on `addr`.
pub fn install(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("installing prometheus exporter on {addr}"))?;
    describe();
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!(
        "nagwatch_alerts_raised_total",
        "Alerts raised by evaluation cycles, nags included"
    );
    describe_counter!(
        "nagwatch_state_purged_total",
        "Entities purged from alert state stores"
    );
    describe_counter!(
        "nagwatch_groupby_stranded_total",
        "Alerts routed to the ungrouped bucket for lack of grouping rules"
    );
    describe_gauge!(
        "nagwatch_groupby_buffered_alerts",
        "Alerts buffered for the next group-by flush"
    );
    describe_counter!(
        "nagwatch_groupby_groups_flushed_total",
        "Alert groups submitted downstream"
    );
    describe_counter!(
        "nagwatch_groupby_submit_failures_total",
        "Alert group submissions that failed or panicked"
    );
}
