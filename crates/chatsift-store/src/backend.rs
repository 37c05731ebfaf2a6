//! Storage contracts shared by every backend.

use chatsift_core::{ExtractedFields, NewRecord, RecordId, SourceConfig, SourceId, StoredRecord};

use crate::StoreError;

/// Durable append-only message store.
///
/// Implementations must tolerate concurrent calls from every worker. A
/// successful [`append`](Self::append) is the commit point: the record is
/// visible to every later `recent` / `by_source_and_fields` call.
pub trait RecordStore: Send + Sync {
    /// Persist a record and return its id.
    fn append(&self, record: NewRecord) -> Result<RecordId, StoreError>;

    /// Up to `limit` records of one source, most recent first.
    fn recent(&self, source_id: SourceId, limit: usize) -> Result<Vec<StoredRecord>, StoreError>;

    /// Up to `limit` records across all sources, most recent first.
    fn recent_all(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError>;

    /// Most recent record of `source_id` whose fields equal every predicate.
    ///
    /// Fields absent from `predicates` are not constrained. An empty predicate
    /// set matches nothing.
    fn by_source_and_fields(
        &self,
        source_id: SourceId,
        predicates: &ExtractedFields,
    ) -> Result<Option<StoredRecord>, StoreError>;
}

/// Durable backing for the in-memory configuration store.
pub trait ConfigBacking: Send + Sync {
    /// Insert or replace one source's config.
    fn save_config(&self, config: &SourceConfig) -> Result<(), StoreError>;

    /// Every persisted source config.
    fn load_configs(&self) -> Result<Vec<SourceConfig>, StoreError>;
}

/// Whether `record` satisfies every predicate.
pub(crate) fn matches_fields(record: &StoredRecord, predicates: &ExtractedFields) -> bool {
    !predicates.is_empty()
        && predicates
            .iter()
            .all(|(field, value)| record.fields.get(field) == Some(value))
}
