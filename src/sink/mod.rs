//! Buffered event output.
//!
//! Every worker owns one [`OutputSink`] per output. The sink collects finished lines in a
//! private buffer and only touches the [`Destination`] on flush, which is the single point on
//! the hot path that may wait. Destinations shared by several workers sit behind a
//! `parking_lot::Mutex`; in threaded mode each worker gets its own file and the lock is
//! never contended.

mod error;
mod file;

use std::{
    io::{self, Write},
    sync::Arc,
    thread,
    time::Duration,
};

pub use error::{SinkError, SinkResult};
pub use file::RotatingFile;
pub(crate) use file::suffixed;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    config::{BackpressurePolicy, OutputConfig},
    observability::stats::OutputStats,
};

/// Somewhere whole batches of newline-terminated records can be appended.
pub trait Destination: Send {
    /// Append `batch`, which always ends on a record boundary.
    ///
    /// Returns `true` if the destination rotated before writing.
    fn write_batch(&mut self, batch: &[u8]) -> SinkResult<bool>;

    fn flush(&mut self) -> SinkResult<()>;
}

/// A destination handle that can be cloned into several workers.
pub type SharedDestination = Arc<Mutex<Box<dyn Destination>>>;

/// Wrap a destination for sharing.
pub fn shared(destination: impl Destination + 'static) -> SharedDestination {
    Arc::new(Mutex::new(Box::new(destination)))
}

/// Process standard output.
#[derive(Debug, Default)]
pub struct StdoutDestination;

impl Destination for StdoutDestination {
    fn write_batch(&mut self, batch: &[u8]) -> SinkResult<bool> {
        let mut out = io::stdout().lock();
        out.write_all(batch)
            .and_then(|()| out.flush())
            .map_err(|source| SinkError::Write {
                target: "stdout".to_string(),
                source,
            })?;
        Ok(false)
    }

    fn flush(&mut self) -> SinkResult<()> {
        io::stdout().flush().map_err(|source| SinkError::Write {
            target: "stdout".to_string(),
            source,
        })
    }
}

/// Open the destination described by `config`.
///
/// `worker` selects the per-worker file `<path>.<worker>` of a threaded output.
pub fn open_destination(
    config: &OutputConfig,
    worker: Option<usize>,
) -> SinkResult<Box<dyn Destination>> {
    if config.is_stdout() {
        return Ok(Box::new(StdoutDestination));
    }
    let path = match worker {
        Some(id) => suffixed(&config.path, id),
        None => config.path.clone(),
    };
    Ok(Box::new(RotatingFile::open(
        path,
        config.rotate_size,
        config.rotate_interval(),
    )?))
}

/// One worker's buffered view of an output.
pub struct OutputSink {
    name: Arc<str>,
    destination: SharedDestination,
    policy: BackpressurePolicy,
    buffer: Vec<u8>,
    /// Records currently in `buffer`.
    pending: u64,
    buffer_size: usize,
    max_buffer_size: usize,
    retry_limit: u32,
    retry_backoff: Duration,
    stats: Arc<OutputStats>,
}

impl OutputSink {
    pub fn new(
        config: &OutputConfig,
        destination: SharedDestination,
        stats: Arc<OutputStats>,
    ) -> Self {
        Self {
            name: Arc::from(config.name.as_str()),
            destination,
            policy: config.on_backpressure,
            buffer: Vec::with_capacity(config.buffer_size.min(config.max_buffer_size)),
            pending: 0,
            buffer_size: config.buffer_size,
            max_buffer_size: config.max_buffer_size,
            retry_limit: config.retry_limit,
            retry_backoff: config.retry_backoff(),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records buffered but not yet written.
    pub fn pending_records(&self) -> u64 {
        self.pending
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Append one record (without its trailing newline).
    ///
    /// Returns `false` if the record was dropped because the `drop` policy buffer is full.
    pub fn write_record(&mut self, record: &[u8]) -> bool {
        let needed = record.len() + 1;

        if self.policy == BackpressurePolicy::Drop
            && self.buffer.len() + needed > self.max_buffer_size
        {
            self.flush_pending(false);
            if self.buffer.len() + needed > self.max_buffer_size {
                let count = self.stats.records_dropped(&self.name, "buffer_full", 1);
                if count.is_multiple_of(100) {
                    tracing::warn!(
                        output = %self.name,
                        dropped_count = count + 1,
                        max_buffer_size = self.max_buffer_size,
                        "Output buffer full: dropping records (destination may be slow)"
                    );
                }
                return false;
            }
        }

        self.buffer.extend_from_slice(record);
        self.buffer.push(b'\n');
        self.pending += 1;

        if self.buffer.len() >= self.buffer_size {
            self.flush_pending(self.policy == BackpressurePolicy::Block);
        }
        true
    }

    /// Write out everything buffered, waiting for the destination regardless of policy.
    ///
    /// Used at shutdown. Records that cannot be written after the configured attempts are
    /// dropped and counted.
    pub fn flush(&mut self) {
        self.flush_pending(true);
        if let Err(e) = self.destination.lock().flush() {
            self.stats.write_failure(&self.name);
            tracing::warn!(output = %self.name, error = %e, "Failed to flush output");
        }
    }

    /// Flush on idle: waits only under the `block` policy.
    pub fn flush_idle(&mut self) {
        self.flush_pending(self.policy == BackpressurePolicy::Block);
    }

    /// Hand the buffer to the destination. Returns `false` if the destination was busy and
    /// `wait` was not set, in which case the buffer is kept.
    fn flush_pending(&mut self, wait: bool) -> bool {
        if self.buffer.is_empty() {
            return true;
        }

        let shared = Arc::clone(&self.destination);
        let mut destination = if wait {
            shared.lock()
        } else {
            match shared.try_lock() {
                Some(guard) => guard,
                None => return false,
            }
        };

        let attempts = match self.policy {
            BackpressurePolicy::Block => self.retry_limit + 1,
            BackpressurePolicy::Drop => 1,
        };
        let mut backoff = self.retry_backoff;

        for attempt in 1..=attempts {
            match destination.write_batch(&self.buffer) {
                Ok(rotated) => {
                    if rotated {
                        self.stats.rotation(&self.name);
                    }
                    self.stats
                        .records_written(&self.name, self.pending, self.buffer.len() as u64);
                    self.clear();
                    return true;
                }
                Err(e) => {
                    self.stats.write_failure(&self.name);
                    tracing::warn!(
                        output = %self.name,
                        attempt,
                        attempts,
                        error = %e,
                        "Failed to write event batch"
                    );
                    if attempt < attempts {
                        MutexGuard::unlocked(&mut destination, || thread::sleep(backoff));
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        drop(destination);

        self.stats
            .records_dropped(&self.name, "write_failed", self.pending);
        tracing::warn!(
            output = %self.name,
            records = self.pending,
            "Dropping event batch after failed writes"
        );
        self.clear();
        true
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.pending = 0;
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            self.flush_pending(true);
        }
    }
}
