//! Worker pool lifecycle: start, submit, drain, shut down.

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chatsift_core::QueueItem;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::queue::{EnqueueOutcome, OverflowPolicy, ShardedQueue};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::worker::{self, Processor};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("failed to spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Capacity of each worker's shard.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 1024,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Grace period used when a pipeline is dropped without [`Pipeline::shutdown`].
pub const DROP_GRACE: Duration = Duration::from_secs(10);

/// A running pool of worker threads fed by a sharded queue.
///
/// Dropping a pipeline drains it like `shutdown(DROP_GRACE)`.
pub struct Pipeline {
    queue: ShardedQueue,
    stats: Arc<PipelineStats>,
    workers: Vec<JoinHandle<()>>,
    deadline: Arc<OnceLock<Instant>>,
}

impl Pipeline {
    /// Spawn `config.workers` threads, one per queue shard.
    pub fn start(config: PipelineConfig, processor: Processor) -> Result<Self, PipelineError> {
        if config.workers == 0 {
            return Err(PipelineError::NoWorkers);
        }
        let stats = Arc::new(PipelineStats::new());
        let queue = ShardedQueue::new(
            config.workers,
            config.queue_capacity,
            config.overflow,
            Arc::clone(&stats),
        );
        let dedup = processor.dedup_strategy();
        let processor = Arc::new(processor);
        let deadline = Arc::new(OnceLock::new());

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..queue.shard_count() {
            let rx = queue.receiver(index);
            let processor = Arc::clone(&processor);
            let stats = Arc::clone(&stats);
            let deadline = Arc::clone(&deadline);
            let handle = thread::Builder::new()
                .name(format!("chatsift-worker-{index}"))
                .spawn(move || worker::run(index, rx, processor, stats, deadline))
                .map_err(|source| {
                    queue.close();
                    PipelineError::Spawn { index, source }
                })?;
            workers.push(handle);
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            dedup = ?dedup,
            "pipeline started"
        );
        Ok(Self {
            queue,
            stats,
            workers,
            deadline,
        })
    }

    /// Hand an item to its source's shard. Never blocks beyond the overflow policy.
    pub fn submit(&self, item: QueueItem) -> EnqueueOutcome {
        self.queue.enqueue(item)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters; outlives the pipeline.
    pub fn stats_handle(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Items waiting in shards (not yet dequeued).
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Block until every accepted item reached a terminal state, or `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.stats.wait_idle(timeout)
    }

    /// Stop intake and let workers drain for up to `grace`.
    ///
    /// Items dequeued after the deadline are abandoned. Workers still busy at
    /// the deadline are detached.
    pub fn shutdown(mut self, grace: Duration) -> StatsSnapshot {
        self.drain(grace)
    }

    fn drain(&mut self, grace: Duration) -> StatsSnapshot {
        let deadline = Instant::now() + grace;
        let _ = self.deadline.set(deadline);
        self.queue.close();
        info!(
            queued = self.queue.len(),
            grace_ms = grace.as_millis() as u64,
            "shutting down pipeline"
        );

        for (index, handle) in std::mem::take(&mut self.workers).into_iter().enumerate() {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if !handle.is_finished() {
                warn!(worker = index, "worker still busy after grace period, detaching");
                continue;
            }
            if handle.join().is_err() {
                error!(worker = index, "worker thread panicked");
            }
        }

        let s = self.stats.snapshot();
        info!(
            enqueued = s.enqueued,
            rejected = s.rejected,
            evicted = s.evicted,
            persisted = s.persisted,
            duplicates = s.duplicates,
            inactive = s.inactive,
            unknown = s.unknown,
            failed = s.failed,
            abandoned = s.abandoned,
            "pipeline stopped"
        );
        s
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!("pipeline dropped without shutdown, draining");
            self.drain(DROP_GRACE);
        }
    }
}
