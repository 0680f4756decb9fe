use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::EngineError;
use crate::{
    config::WorkersConfig,
    dispatch::{Completion, WorkerContext},
    observability::stats::{OutputStats, StatsSnapshot},
};

/// Worker threads fed through bounded lanes.
///
/// Completions of one flow always go to the same lane, so their events keep their order.
/// Submitting blocks while the lane is full. Shutdown closes the lanes; each worker
/// dispatches what is still queued, flushes its sinks and exits.
pub struct WorkerPool {
    lanes: Vec<Sender<Completion>>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<OutputStats>,
}

impl WorkerPool {
    pub(super) fn spawn(
        contexts: Vec<WorkerContext>,
        config: &WorkersConfig,
        stats: Arc<OutputStats>,
    ) -> Result<Self, EngineError> {
        let flush_interval = config.flush_interval();
        let mut lanes = Vec::with_capacity(contexts.len());
        let mut handles = Vec::with_capacity(contexts.len());

        for ctx in contexts {
            let worker = ctx.id();
            let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);
            let handle = thread::Builder::new()
                .name(format!("evelog-worker-{worker}"))
                .spawn(move || run_worker(ctx, receiver, flush_interval))
                .map_err(|source| EngineError::Spawn { worker, source })?;
            lanes.push(sender);
            handles.push(handle);
        }

        tracing::info!(workers = handles.len(), "Started output workers");

        Ok(Self {
            lanes,
            handles,
            stats,
        })
    }

    pub fn workers(&self) -> usize {
        self.lanes.len()
    }

    /// Queue a completion on the lane of its flow.
    pub fn submit(&self, completion: Completion) -> Result<(), EngineError> {
        let lane = (completion.flow_id % self.lanes.len() as u64) as usize;
        self.lanes[lane]
            .send(completion)
            .map_err(|_| EngineError::LaneClosed(lane))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting completions, let every worker finish its queue and flush, and wait
    /// for them to exit.
    pub fn shutdown(self) -> StatsSnapshot {
        let Self {
            lanes,
            handles,
            stats,
        } = self;
        drop(lanes);

        for (worker, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                tracing::error!(worker, "Output worker panicked");
            }
        }

        let snapshot = stats.snapshot();
        tracing::info!(
            submitted = snapshot.events_submitted,
            written = snapshot.records_written,
            dropped = snapshot.records_dropped,
            "Output workers shut down"
        );
        snapshot
    }
}

fn run_worker(mut ctx: WorkerContext, receiver: Receiver<Completion>, flush_interval: Duration) {
    let mut last_flush = Instant::now();

    loop {
        match receiver.recv_timeout(flush_interval) {
            Ok(completion) => {
                ctx.dispatch(&completion.as_event());
                if last_flush.elapsed() >= flush_interval {
                    ctx.flush_idle();
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                ctx.flush_idle();
                last_flush = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    ctx.shutdown();
}
