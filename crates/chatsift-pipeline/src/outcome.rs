use std::fmt;

use chatsift_core::RecordId;

/// Terminal state of one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Persisted(RecordId),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No config exists for the source.
    UnknownSource,
    InactiveSource,
    Duplicate,
    /// The store rejected the append; not retried.
    PersistenceFailed,
    /// Processing panicked; the worker carried on.
    Panicked,
    /// Dequeued after the shutdown grace deadline.
    Abandoned,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::UnknownSource => "unknown_source",
            DropReason::InactiveSource => "inactive_source",
            DropReason::Duplicate => "duplicate",
            DropReason::PersistenceFailed => "persistence_failed",
            DropReason::Panicked => "panicked",
            DropReason::Abandoned => "abandoned",
        })
    }
}
