//! Metrics collection and exposition.
//!
//! # Metrics
//! - `routekv_commits_total` (counter): commits by mode, outcome
//! - `routekv_commit_duration_seconds` (histogram): commit latency by mode
//! - `routekv_routes` (gauge): routes in the committed table
//! - `routekv_route_mutations_total` (counter): applied adds/removes by op
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - The Prometheus exporter is opt-in (`observability.metrics_enabled`)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::config::StorageMode;

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(address).install()?;
    tracing::info!(%address, "Prometheus exporter listening");
    Ok(())
}

/// Record one commit attempt.
pub fn record_commit(mode: StorageMode, ok: bool, start: Instant) {
    let outcome = if ok { "success" } else { "error" };
    counter!(
        "routekv_commits_total",
        "mode" => mode.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("routekv_commit_duration_seconds", "mode" => mode.as_str())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_route_count(routes: usize) {
    gauge!("routekv_routes").set(routes as f64);
}

/// Record an applied mutation (`add` or `remove`).
pub fn record_mutation(op: &'static str) {
    counter!("routekv_route_mutations_total", "op" => op).increment(1);
}
