//! Cross-module scenarios: several workers, real files, shutdown and rotation.

mod shutdown;

use std::{
    io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::sink::{Destination, SinkError, SinkResult};

/// In-memory destination that fails the first `failures` writes.
#[derive(Clone, Default)]
pub(crate) struct MemoryDestination {
    pub(crate) written: Arc<Mutex<Vec<u8>>>,
    pub(crate) failures: Arc<AtomicUsize>,
    pub(crate) calls: Arc<AtomicUsize>,
}

impl MemoryDestination {
    pub(crate) fn failing(failures: usize) -> Self {
        let dest = Self::default();
        dest.failures.store(failures, Ordering::SeqCst);
        dest
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        String::from_utf8(self.written.lock().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Destination for MemoryDestination {
    fn write_batch(&mut self, batch: &[u8]) -> SinkResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError::Write {
                target: "memory".into(),
                source: io::Error::other("disk full"),
            });
        }
        self.written.lock().extend_from_slice(batch);
        Ok(false)
    }

    fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }
}

/// Every line of `path` decoded as JSON. Panics on a partial or malformed line.
pub(crate) fn read_events(path: &Path) -> Vec<serde_json::Value> {
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(
        contents.is_empty() || contents.ends_with('\n'),
        "{} ends with a partial line",
        path.display()
    );
    contents
        .lines()
        .map(|line| {
            serde_json::from_str(line)
                .unwrap_or_else(|e| panic!("malformed line in {}: {e}: {line}", path.display()))
        })
        .collect()
}
