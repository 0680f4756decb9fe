//! Completion dispatch.
//!
//! A [`WorkerContext`] is owned by exactly one worker thread. It holds the worker's
//! [`JsonBuilder`] and one [`OutputSink`] per output, so the whole path from transaction to
//! buffered line runs without shared mutable state. Only a sink flush touches a lock.

mod envelope;

use std::{net::IpAddr, sync::Arc};

use chrono::{DateTime, Utc};
pub use envelope::TIMESTAMP_FORMAT;

use crate::{
    builder::{BuilderError, JsonBuilder},
    extract::{Anomalies, TransactionRecord, TransactionRef},
    observability::stats::OutputStats,
    registry::LoggerRegistry,
    sink::OutputSink,
};

/// Endpoints of the flow a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTuple {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dest_ip: IpAddr,
    pub dest_port: u16,
}

/// Completion signal for a borrowed transaction.
#[derive(Debug, Clone, Copy)]
pub struct CompletionEvent<'a> {
    pub timestamp: DateTime<Utc>,
    pub flow_id: u64,
    pub flow: Option<FlowTuple>,
    pub tx: TransactionRef<'a>,
}

impl<'a> CompletionEvent<'a> {
    /// An event completed now, without flow endpoints.
    pub fn new(flow_id: u64, tx: impl Into<TransactionRef<'a>>) -> Self {
        Self {
            timestamp: Utc::now(),
            flow_id,
            flow: None,
            tx: tx.into(),
        }
    }

    pub fn with_flow(mut self, flow: FlowTuple) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Completion signal that owns its transaction, for handing over to a worker lane.
#[derive(Debug, Clone)]
pub struct Completion {
    pub timestamp: DateTime<Utc>,
    pub flow_id: u64,
    pub flow: Option<FlowTuple>,
    pub tx: TransactionRecord,
}

impl Completion {
    pub fn new(flow_id: u64, tx: impl Into<TransactionRecord>) -> Self {
        Self {
            timestamp: Utc::now(),
            flow_id,
            flow: None,
            tx: tx.into(),
        }
    }

    pub fn with_flow(mut self, flow: FlowTuple) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn as_event(&self) -> CompletionEvent<'_> {
        CompletionEvent {
            timestamp: self.timestamp,
            flow_id: self.flow_id,
            flow: self.flow,
            tx: self.tx.as_tx(),
        }
    }
}

/// What happened to one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record was handed to its output sink.
    Submitted,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No logger is registered for the protocol.
    Unregistered,
    /// The extractor found nothing to log.
    NoMetadata,
    /// The record nested deeper than the builder allows.
    DepthExceeded,
    /// The builder was used incorrectly; only returned in release builds.
    Misuse,
}

/// Per-worker dispatch state.
pub struct WorkerContext {
    id: usize,
    registry: Arc<LoggerRegistry>,
    sinks: Vec<OutputSink>,
    builder: JsonBuilder,
    anomalies: Anomalies,
    scratch: String,
    stats: Arc<OutputStats>,
}

impl WorkerContext {
    /// `sinks` must hold one sink per output, in output order.
    pub(crate) fn new(
        id: usize,
        registry: Arc<LoggerRegistry>,
        sinks: Vec<OutputSink>,
        stats: Arc<OutputStats>,
    ) -> Self {
        Self {
            id,
            registry,
            sinks,
            builder: JsonBuilder::with_capacity(4096),
            anomalies: Anomalies::new(),
            scratch: String::with_capacity(64),
            stats,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stats(&self) -> &OutputStats {
        &self.stats
    }

    /// Turn one completed transaction into an event line.
    ///
    /// Never fails: everything that goes wrong is reported as a [`DropReason`] and counted.
    /// Builder misuse panics in debug builds.
    pub fn dispatch(&mut self, event: &CompletionEvent<'_>) -> DispatchOutcome {
        let proto = event.tx.proto();

        let Some(registration) = self.registry.lookup(proto) else {
            self.stats.event_unregistered(proto);
            tracing::trace!(worker = self.id, %proto, "No logger registered");
            return DispatchOutcome::Dropped(DropReason::Unregistered);
        };

        self.anomalies = Anomalies::new();
        let result = envelope::write_event(
            &mut self.builder,
            &mut self.scratch,
            event,
            registration,
            &mut self.anomalies,
        );

        if !self.anomalies.is_empty() {
            self.stats
                .extraction_anomalies(proto, self.anomalies.count());
            tracing::debug!(
                worker = self.id,
                %proto,
                flow_id = event.flow_id,
                anomalies = self.anomalies.count(),
                last_field = self.anomalies.last_field(),
                "Omitted malformed transaction fields"
            );
        }

        match result.and_then(|logged| {
            if logged {
                self.builder.finish().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(record)) => {
                self.sinks[registration.target().index()].write_record(record);
                self.stats.event_submitted(proto);
                tracing::trace!(worker = self.id, %proto, flow_id = event.flow_id, "Event submitted");
                DispatchOutcome::Submitted
            }
            Ok(None) => {
                self.stats.event_no_metadata(proto);
                tracing::trace!(worker = self.id, %proto, flow_id = event.flow_id, "No metadata to log");
                DispatchOutcome::Dropped(DropReason::NoMetadata)
            }
            Err(BuilderError::DepthExceeded { max }) => {
                self.builder.reset();
                self.stats.depth_exceeded(proto);
                tracing::debug!(
                    worker = self.id,
                    %proto,
                    flow_id = event.flow_id,
                    max_depth = max,
                    "Event nested too deep, record abandoned"
                );
                DispatchOutcome::Dropped(DropReason::DepthExceeded)
            }
            Err(e) => {
                if cfg!(debug_assertions) {
                    panic!("JSON builder misuse while logging {proto}: {e}");
                }
                self.builder.reset();
                self.stats.misuse_reset(proto);
                tracing::error!(worker = self.id, %proto, error = %e, "JSON builder misuse, builder reset");
                DispatchOutcome::Dropped(DropReason::Misuse)
            }
        }
    }

    /// Flush sinks after the worker went idle.
    pub fn flush_idle(&mut self) {
        for sink in &mut self.sinks {
            sink.flush_idle();
        }
    }

    /// Write out every buffered record, waiting for destinations if necessary.
    pub fn flush(&mut self) {
        for sink in &mut self.sinks {
            sink.flush();
        }
    }

    /// Flush everything and release the worker's sinks.
    pub fn shutdown(mut self) {
        self.flush();
        tracing::debug!(worker = self.id, "Worker context shut down");
    }
}
