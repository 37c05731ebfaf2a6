//! Per-item processing and the worker loop.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chatsift_core::{ConfigStore, NewRecord, QueueItem, TagValueLog, preview};
use chatsift_store::RecordStore;
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::dedup::{DedupStrategy, DuplicateDetector};
use crate::outcome::{DropReason, Outcome};
use crate::stats::PipelineStats;

const PREVIEW_CHARS: usize = 100;

/// Everything a worker needs to take one item to a terminal state.
pub struct Processor {
    configs: Arc<ConfigStore>,
    coordinator: Coordinator,
    detector: DuplicateDetector,
    store: Arc<dyn RecordStore>,
    tag_values: Arc<TagValueLog>,
}

impl Processor {
    pub fn new(
        configs: Arc<ConfigStore>,
        coordinator: Coordinator,
        detector: DuplicateDetector,
        store: Arc<dyn RecordStore>,
        tag_values: Arc<TagValueLog>,
    ) -> Self {
        Self {
            configs,
            coordinator,
            detector,
            store,
            tag_values,
        }
    }

    pub fn dedup_strategy(&self) -> DedupStrategy {
        self.detector.strategy()
    }

    /// config lookup → extraction → dedup → append.
    ///
    /// Works on a snapshot of the source config taken at dequeue time; a
    /// concurrent mutation applies from the next item on.
    pub fn process(&self, item: QueueItem) -> Outcome {
        let source_id = item.source_id;
        let Some(config) = self.configs.get(source_id) else {
            info!(source_id, reason = %DropReason::UnknownSource, "dropped");
            return Outcome::Dropped(DropReason::UnknownSource);
        };
        if !config.active {
            info!(source_id, reason = %DropReason::InactiveSource, "dropped");
            return Outcome::Dropped(DropReason::InactiveSource);
        }

        let extraction = self.coordinator.extract(&config, &item.raw_text);
        let new_values = self.tag_values.record(source_id, &extraction.tag_fields);
        if new_values > 0 {
            debug!(source_id, new_values, "recorded new tag values");
        }

        if self.detector.is_duplicate(
            source_id,
            &item.raw_text,
            &extraction.fields,
            config.duplicate_threshold,
        ) {
            info!(
                source_id,
                reason = %DropReason::Duplicate,
                text = %preview(&item.raw_text, PREVIEW_CHARS),
                "dropped"
            );
            return Outcome::Dropped(DropReason::Duplicate);
        }

        let text = preview(&item.raw_text, PREVIEW_CHARS);
        match self.store.append(NewRecord::from_item(item, extraction.fields)) {
            Ok(record_id) => {
                info!(source_id, %record_id, text = %text, "persisted");
                Outcome::Persisted(record_id)
            }
            Err(e) => {
                error!(
                    source_id,
                    error = %e,
                    text = %text,
                    reason = %DropReason::PersistenceFailed,
                    "dropped"
                );
                Outcome::Dropped(DropReason::PersistenceFailed)
            }
        }
    }
}

/// Drain `rx` until the queue is closed and empty.
///
/// Items dequeued after `deadline` is set and passed are abandoned unprocessed.
pub(crate) fn run(
    index: usize,
    rx: Receiver<QueueItem>,
    processor: Arc<Processor>,
    stats: Arc<PipelineStats>,
    deadline: Arc<OnceLock<Instant>>,
) {
    debug!(worker = index, "worker started");
    for item in rx.iter() {
        let source_id = item.source_id;
        let outcome = if deadline.get().is_some_and(|d| Instant::now() >= *d) {
            warn!(
                worker = index,
                source_id,
                text = %preview(&item.raw_text, PREVIEW_CHARS),
                reason = %DropReason::Abandoned,
                "dropped after shutdown grace period"
            );
            Outcome::Dropped(DropReason::Abandoned)
        } else {
            let text = preview(&item.raw_text, PREVIEW_CHARS);
            match catch_unwind(AssertUnwindSafe(|| processor.process(item))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    error!(
                        worker = index,
                        source_id,
                        text = %text,
                        panic = %panic_message(payload.as_ref()),
                        "item processing panicked"
                    );
                    Outcome::Dropped(DropReason::Panicked)
                }
            }
        };
        stats.record_outcome(&outcome);
        stats.finish();
    }
    debug!(worker = index, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
