//! Observability setup: structured logging and metrics (Prometheus) for the
//! data-lock tooling.

use falcon_common::lock_metrics::LockMetricsReport;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
/// `RUST_LOG` takes precedence over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize Prometheus metrics exporter.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one `scan` or `fetch` call of a data-lock iterator.
/// `table` is `data_locks` or `data_lock_waits`.
pub fn record_data_lock_call(table: &str, op: &str, rows: usize) {
    metrics::counter!("falcon_data_lock_scan_calls_total", "table" => table.to_string(), "op" => op.to_string())
        .increment(1);
    metrics::counter!("falcon_data_lock_rows_total", "table" => table.to_string())
        .increment(rows as u64);
}

/// Publish the lock-system latch counters as gauges, one series per latch.
pub fn record_latch_metrics(report: &LockMetricsReport) {
    for latch in &report.latches {
        let gauges = [
            ("falcon_latch_acquires", latch.acquires),
            ("falcon_latch_contentions", latch.contentions),
            ("falcon_latch_wait_us_total", latch.total_wait_us),
            ("falcon_latch_wait_us_max", latch.max_wait_us),
            ("falcon_latch_hold_us_total", latch.total_hold_us),
            ("falcon_latch_hold_us_max", latch.max_hold_us),
        ];
        for (metric, value) in gauges {
            metrics::gauge!(metric, "latch" => latch.name.clone()).set(value as f64);
        }
    }
    metrics::gauge!("falcon_latch_contentions_total").set(report.total_contentions as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use falcon_common::lock_metrics::LatchSnapshot;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_data_lock_call("data_locks", "scan", 3);
        record_latch_metrics(&LockMetricsReport::from_snapshots(vec![LatchSnapshot {
            name: "lock_sys".into(),
            acquires: 4,
            ..Default::default()
        }]));
    }

    #[test]
    fn test_init_metrics_rejects_bad_address() {
        assert!(init_metrics("not an address").is_err());
    }
}
