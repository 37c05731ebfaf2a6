//! Processing counters and idle tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::outcome::{DropReason, Outcome};

/// Live counters shared by the queue and every worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    persisted: AtomicU64,
    duplicates: AtomicU64,
    inactive: AtomicU64,
    unknown: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    pending: Mutex<u64>,
    idle: Condvar,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub inactive: u64,
    pub unknown: u64,
    pub failed: u64,
    pub abandoned: u64,
}

impl StatsSnapshot {
    /// Items that reached a terminal state in a worker.
    pub fn processed(&self) -> u64 {
        self.persisted
            + self.duplicates
            + self.inactive
            + self.unknown
            + self.failed
            + self.abandoned
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a pending slot before an item becomes visible to workers.
    pub(crate) fn begin(&self) {
        *self.pending.lock() += 1;
    }

    /// Release a pending slot; wakes `wait_idle` callers at zero.
    pub(crate) fn finish(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Persisted(_) => &self.persisted,
            Outcome::Dropped(DropReason::Duplicate) => &self.duplicates,
            Outcome::Dropped(DropReason::InactiveSource) => &self.inactive,
            Outcome::Dropped(DropReason::UnknownSource) => &self.unknown,
            Outcome::Dropped(DropReason::PersistenceFailed | DropReason::Panicked) => &self.failed,
            Outcome::Dropped(DropReason::Abandoned) => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Accepted items not yet in a terminal state.
    pub fn pending(&self) -> u64 {
        *self.pending.lock()
    }

    /// Block until nothing is pending or `timeout` elapses. Returns whether idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            inactive: self.inactive.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}
