//! Bounded ingestion queue, sharded by source id.
//!
//! One FIFO shard per worker. Every item of a source lands in the same shard,
//! so a source's messages are processed in arrival order by a single worker.

use std::sync::Arc;
use std::time::Duration;

use chatsift_core::{QueueItem, SourceId};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::stats::PipelineStats;

/// What to do when the target shard is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Reject the incoming item.
    #[default]
    DropNewest,
    /// Evict the shard's oldest queued item to make room.
    DropOldest,
    /// Wait up to `timeout` for room, then reject.
    Block { timeout: Duration },
}

/// Result of offering an item to the queue.
#[derive(Debug, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting this older item.
    Evicted(QueueItem),
    /// Not queued: shard full or queue closed.
    Rejected(QueueItem),
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected(_))
    }
}

/// Shard index for `source_id`. Stable for the lifetime of the queue.
pub fn shard_for(source_id: SourceId, shards: usize) -> usize {
    source_id.rem_euclid(shards.max(1) as i64) as usize
}

pub(crate) struct ShardedQueue {
    senders: RwLock<Option<Vec<Sender<QueueItem>>>>,
    receivers: Vec<Receiver<QueueItem>>,
    policy: OverflowPolicy,
    stats: Arc<PipelineStats>,
}

impl ShardedQueue {
    pub(crate) fn new(
        shards: usize,
        capacity: usize,
        policy: OverflowPolicy,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (senders, receivers) = (0..shards.max(1)).map(|_| bounded(capacity.max(1))).unzip();
        Self {
            senders: RwLock::new(Some(senders)),
            receivers,
            policy,
            stats,
        }
    }

    /// Receiving end of shard `index`, for its worker.
    pub(crate) fn receiver(&self, index: usize) -> Receiver<QueueItem> {
        self.receivers[index].clone()
    }

    pub(crate) fn shard_count(&self) -> usize {
        self.receivers.len()
    }

    /// Offer an item. Never blocks longer than the configured policy allows.
    pub(crate) fn enqueue(&self, item: QueueItem) -> EnqueueOutcome {
        let senders = self.senders.read();
        let Some(senders) = senders.as_ref() else {
            debug!(source_id = item.source_id, "queue closed, rejecting item");
            self.stats.record_rejected();
            return EnqueueOutcome::Rejected(item);
        };
        let index = shard_for(item.source_id, senders.len());
        let tx = &senders[index];

        self.stats.begin();
        let outcome = match self.policy {
            OverflowPolicy::DropNewest => match tx.try_send(item) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(TrySendError::Full(item) | TrySendError::Disconnected(item)) => {
                    EnqueueOutcome::Rejected(item)
                }
            },
            OverflowPolicy::DropOldest => match tx.try_send(item) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(TrySendError::Disconnected(item)) => EnqueueOutcome::Rejected(item),
                Err(TrySendError::Full(item)) => {
                    let evicted = self.receivers[index].try_recv().ok();
                    match (tx.try_send(item), evicted) {
                        (Ok(()), Some(old)) => EnqueueOutcome::Evicted(old),
                        (Ok(()), None) => EnqueueOutcome::Queued,
                        (Err(e), evicted) => {
                            // Lost the freed slot to another producer; the
                            // evicted item is gone either way.
                            if evicted.is_some() {
                                self.stats.record_evicted();
                                self.stats.finish();
                            }
                            EnqueueOutcome::Rejected(e.into_inner())
                        }
                    }
                }
            },
            OverflowPolicy::Block { timeout } => match tx.send_timeout(item, timeout) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(SendTimeoutError::Timeout(item) | SendTimeoutError::Disconnected(item)) => {
                    EnqueueOutcome::Rejected(item)
                }
            },
        };

        match &outcome {
            EnqueueOutcome::Queued => self.stats.record_enqueued(),
            EnqueueOutcome::Evicted(old) => {
                warn!(
                    source_id = old.source_id,
                    shard = index,
                    "shard full, evicted oldest item"
                );
                self.stats.record_enqueued();
                self.stats.record_evicted();
                self.stats.finish();
            }
            EnqueueOutcome::Rejected(rejected) => {
                warn!(
                    source_id = rejected.source_id,
                    shard = index,
                    "shard full, rejected item"
                );
                self.stats.record_rejected();
                self.stats.finish();
            }
        }
        outcome
    }

    /// Stop intake. Workers drain what is already queued, then exit.
    pub(crate) fn close(&self) {
        self.senders.write().take();
    }

    pub(crate) fn len(&self) -> usize {
        self.receivers.iter().map(Receiver::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(source_id: SourceId, text: &str) -> QueueItem {
        QueueItem::new(
            source_id,
            text,
            Utc.with_ymd_and_hms(2024, 5, 16, 12, 0, 0).unwrap(),
        )
    }

    fn queue(capacity: usize, policy: OverflowPolicy) -> (ShardedQueue, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        (ShardedQueue::new(1, capacity, policy, Arc::clone(&stats)), stats)
    }

    #[test]
    fn shard_routing_is_stable_and_handles_negative_ids() {
        assert_eq!(shard_for(7, 3), shard_for(7, 3));
        assert_eq!(shard_for(-1001234, 3), shard_for(-1001234, 3));
        assert!(shard_for(-5, 3) < 3);
        assert_eq!(shard_for(42, 0), 0);
    }

    #[test]
    fn same_source_keeps_fifo_order() {
        let stats = Arc::new(PipelineStats::new());
        let q = ShardedQueue::new(3, 8, OverflowPolicy::DropNewest, stats);
        for text in ["a", "b", "c"] {
            assert_eq!(q.enqueue(item(5, text)), EnqueueOutcome::Queued);
        }
        let rx = q.receiver(shard_for(5, 3));
        let texts: Vec<_> = rx.try_iter().map(|i| i.raw_text).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn drop_newest_rejects_when_full() {
        let (q, stats) = queue(1, OverflowPolicy::DropNewest);
        assert!(q.enqueue(item(1, "first")).is_queued());
        assert_eq!(
            q.enqueue(item(1, "second")),
            EnqueueOutcome::Rejected(item(1, "second"))
        );
        let snap = stats.snapshot();
        assert_eq!((snap.enqueued, snap.rejected), (1, 1));
        assert_eq!(stats.pending(), 1);
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let (q, stats) = queue(2, OverflowPolicy::DropOldest);
        q.enqueue(item(1, "one"));
        q.enqueue(item(1, "two"));
        match q.enqueue(item(1, "three")) {
            EnqueueOutcome::Evicted(old) => assert_eq!(old.raw_text, "one"),
            other => panic!("expected eviction, got {other:?}"),
        }
        let texts: Vec<_> = q.receiver(0).try_iter().map(|i| i.raw_text).collect();
        assert_eq!(texts, ["two", "three"]);
        let snap = stats.snapshot();
        assert_eq!((snap.enqueued, snap.evicted), (3, 1));
    }

    #[test]
    fn block_times_out_then_rejects() {
        let (q, stats) = queue(1, OverflowPolicy::Block {
            timeout: Duration::from_millis(20),
        });
        q.enqueue(item(1, "one"));
        assert!(matches!(q.enqueue(item(1, "two")), EnqueueOutcome::Rejected(_)));
        assert_eq!(stats.snapshot().rejected, 1);
    }

    #[test]
    fn closed_queue_rejects() {
        let (q, _) = queue(4, OverflowPolicy::DropNewest);
        q.close();
        assert!(matches!(q.enqueue(item(1, "late")), EnqueueOutcome::Rejected(_)));
    }
}
