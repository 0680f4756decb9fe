//! Process-wide output counters.
//!
//! Always compiled, unlike the Prometheus mirror in [`metrics`](super::metrics): callers read
//! them through [`OutputStats::snapshot`] at shutdown or on demand.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::metrics;
use crate::extract::AppProto;

/// Counters shared by every worker of one engine.
#[derive(Debug, Default)]
pub struct OutputStats {
    events_submitted: AtomicU64,
    events_unregistered: AtomicU64,
    events_no_metadata: AtomicU64,
    extraction_anomalies: AtomicU64,
    depth_exceeded: AtomicU64,
    misuse_resets: AtomicU64,
    records_written: AtomicU64,
    records_dropped: AtomicU64,
    write_failures: AtomicU64,
    rotations: AtomicU64,
    bytes_written: AtomicU64,
}

/// Point-in-time copy of [`OutputStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_submitted: u64,
    pub events_unregistered: u64,
    pub events_no_metadata: u64,
    pub extraction_anomalies: u64,
    pub depth_exceeded: u64,
    pub misuse_resets: u64,
    pub records_written: u64,
    pub records_dropped: u64,
    pub write_failures: u64,
    pub rotations: u64,
    pub bytes_written: u64,
}

impl OutputStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_submitted: self.events_submitted.load(Ordering::Relaxed),
            events_unregistered: self.events_unregistered.load(Ordering::Relaxed),
            events_no_metadata: self.events_no_metadata.load(Ordering::Relaxed),
            extraction_anomalies: self.extraction_anomalies.load(Ordering::Relaxed),
            depth_exceeded: self.depth_exceeded.load(Ordering::Relaxed),
            misuse_resets: self.misuse_resets.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn event_submitted(&self, proto: AppProto) {
        self.events_submitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_dispatch(proto.as_str(), "submitted");
    }

    pub(crate) fn event_unregistered(&self, proto: AppProto) {
        self.events_unregistered.fetch_add(1, Ordering::Relaxed);
        metrics::record_dispatch(proto.as_str(), "unregistered");
    }

    pub(crate) fn event_no_metadata(&self, proto: AppProto) {
        self.events_no_metadata.fetch_add(1, Ordering::Relaxed);
        metrics::record_dispatch(proto.as_str(), "no_metadata");
    }

    pub(crate) fn extraction_anomalies(&self, proto: AppProto, count: u64) {
        if count == 0 {
            return;
        }
        self.extraction_anomalies.fetch_add(count, Ordering::Relaxed);
        metrics::record_extraction_anomalies(proto.as_str(), count);
    }

    pub(crate) fn depth_exceeded(&self, proto: AppProto) {
        self.depth_exceeded.fetch_add(1, Ordering::Relaxed);
        metrics::record_builder_error(proto.as_str(), "depth_exceeded");
    }

    pub(crate) fn misuse_reset(&self, proto: AppProto) {
        self.misuse_resets.fetch_add(1, Ordering::Relaxed);
        metrics::record_builder_error(proto.as_str(), "misuse");
    }

    pub(crate) fn records_written(&self, output: &str, records: u64, bytes: u64) {
        self.records_written.fetch_add(records, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        metrics::record_sink_write(output, records, bytes);
    }

    /// Count dropped records and return the total dropped before this call.
    pub(crate) fn records_dropped(&self, output: &str, reason: &'static str, records: u64) -> u64 {
        metrics::record_sink_drop(output, reason, records);
        self.records_dropped.fetch_add(records, Ordering::Relaxed)
    }

    pub(crate) fn write_failure(&self, output: &str) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_write_failure(output);
    }

    pub(crate) fn rotation(&self, output: &str) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
        metrics::record_rotation(output);
    }
}
