//! Metrics
//!
//! Prometheus recorder plus the [`StatsRecorder`] seam the broker and the
//! bridge report through.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Live WebSocket sessions (gauge).
pub const WS_CLIENTS: &str = "ws_clients";
/// Events accepted by the bridge and queued for fan-out (counter).
pub const WS_EVENTS_TOTAL: &str = "ws_events_total";
/// Deliveries that failed and caused a session removal (counter).
pub const WS_DELIVERY_FAILURES_TOTAL: &str = "ws_delivery_failures_total";

/// Sink for broker and bridge statistics
pub trait StatsRecorder: Send + Sync {
    /// Sample the number of registered sessions
    fn ws_clients(&self, count: usize);

    /// Count one event accepted by the bridge
    fn ws_event(&self);

    /// Count one failed delivery
    fn delivery_failure(&self);
}

/// Records through the global `metrics` recorder
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusStats;

impl StatsRecorder for PrometheusStats {
    fn ws_clients(&self, count: usize) {
        metrics::gauge!(WS_CLIENTS).set(count as f64);
    }

    fn ws_event(&self) {
        metrics::counter!(WS_EVENTS_TOTAL).increment(1);
    }

    fn delivery_failure(&self) {
        metrics::counter!(WS_DELIVERY_FAILURES_TOTAL).increment(1);
    }
}

/// Install the Prometheus recorder globally. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}
