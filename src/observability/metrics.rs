//! Prometheus metrics for event output.
//!
//! Provides metrics for:
//! - Dispatch outcomes per protocol
//! - Extraction anomalies and builder errors
//! - Sink writes, drops, failures and rotations per output
//!
//! Every function compiles to a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────
//
// Protocol, outcome and reason labels are static. Output names come from the
// configuration and are owned per call.

/// Record the outcome of one dispatch ("submitted", "unregistered", "no_metadata", ...).
pub fn record_dispatch(proto: &'static str, outcome: &'static str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("evelog_events_total", "proto" => proto, "outcome" => outcome)
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (proto, outcome);
    }
}

/// Record fields omitted by an extractor.
pub fn record_extraction_anomalies(proto: &'static str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("evelog_extraction_anomalies_total", "proto" => proto)
            .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (proto, count);
    }
}

/// Record a builder error ("misuse" or "depth_exceeded").
pub fn record_builder_error(proto: &'static str, kind: &'static str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("evelog_builder_errors_total", "proto" => proto, "kind" => kind)
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (proto, kind);
    }
}

/// Record records and bytes that reached a destination.
pub fn record_sink_write(output: &str, records: u64, bytes: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("evelog_records_written_total", "output" => output.to_string()).increment(records);
        counter!("evelog_bytes_written_total", "output" => output.to_string()).increment(bytes);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (output, records, bytes);
    }
}

/// Record records discarded by a sink ("buffer_full" or "write_failed").
pub fn record_sink_drop(output: &str, reason: &'static str, records: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("evelog_records_dropped_total", "output" => output.to_string(), "reason" => reason)
            .increment(records);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (output, reason, records);
    }
}

/// Record a failed write attempt.
pub fn record_write_failure(output: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("evelog_write_failures_total", "output" => output.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = output;
    }
}

/// Record a file rotation.
pub fn record_rotation(output: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("evelog_rotations_total", "output" => output.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = output;
    }
}

/// Errors from metrics setup.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_init_is_noop() {
        assert!(init_metrics(&MetricsConfig { enabled: false }).is_ok());
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        record_dispatch("pgsql", "submitted");
        record_extraction_anomalies("ftp", 2);
        record_builder_error("ssh", "depth_exceeded");
        record_sink_write("eve", 3, 120);
        record_sink_drop("eve", "buffer_full", 1);
        record_write_failure("eve");
        record_rotation("eve");
    }

    #[test]
    fn test_protocol_labels_are_static() {
        for proto in crate::extract::AppProto::ALL {
            let label: &'static str = proto.as_str();
            record_dispatch(label, "no_metadata");
            record_builder_error(label, "misuse");
        }
    }
}
