//! Concurrent processing pipeline: sharded ingestion queue, worker pool,
//! extraction coordinator, and duplicate detection.

pub mod coordinator;
pub mod dedup;
mod outcome;
mod pipeline;
pub mod queue;
mod stats;
mod worker;

pub use coordinator::{Coordinator, Extraction};
pub use dedup::{DedupStrategy, DuplicateDetector};
pub use outcome::{DropReason, Outcome};
pub use pipeline::{DROP_GRACE, Pipeline, PipelineConfig, PipelineError};
pub use queue::{EnqueueOutcome, OverflowPolicy};
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::Processor;
