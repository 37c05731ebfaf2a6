//! In-process store for tests and ephemeral runs.

use std::collections::BTreeMap;

use chatsift_core::{ExtractedFields, NewRecord, RecordId, SourceConfig, SourceId, StoredRecord};
use parking_lot::{Mutex, RwLock};

use crate::backend::{ConfigBacking, RecordStore, matches_fields};
use crate::StoreError;

/// Non-durable [`RecordStore`] + [`ConfigBacking`] backed by process memory.
///
/// Ids are assigned sequentially from 1 in append order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<StoredRecord>>,
    configs: Mutex<BTreeMap<SourceId, SourceConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records matching `filter`, most recent first.
    fn newest_first(&self, filter: impl Fn(&StoredRecord) -> bool) -> Vec<StoredRecord> {
        let records = self.records.read();
        let mut matching: Vec<StoredRecord> =
            records.iter().filter(|r| filter(r)).cloned().collect();
        matching.sort_by(|a, b| (b.received_at, b.id).cmp(&(a.received_at, a.id)));
        matching
    }
}

impl RecordStore for MemoryStore {
    fn append(&self, record: NewRecord) -> Result<RecordId, StoreError> {
        let mut records = self.records.write();
        let id = RecordId(records.len() as i64 + 1);
        records.push(StoredRecord::from_new(id, record));
        Ok(id)
    }

    fn recent(&self, source_id: SourceId, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let mut out = self.newest_first(|r| r.source_id == source_id);
        out.truncate(limit);
        Ok(out)
    }

    fn recent_all(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let mut out = self.newest_first(|_| true);
        out.truncate(limit);
        Ok(out)
    }

    fn by_source_and_fields(
        &self,
        source_id: SourceId,
        predicates: &ExtractedFields,
    ) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self
            .newest_first(|r| r.source_id == source_id && matches_fields(r, predicates))
            .into_iter()
            .next())
    }
}

impl ConfigBacking for MemoryStore {
    fn save_config(&self, config: &SourceConfig) -> Result<(), StoreError> {
        self.configs.lock().insert(config.source_id, config.clone());
        Ok(())
    }

    fn load_configs(&self) -> Result<Vec<SourceConfig>, StoreError> {
        Ok(self.configs.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(source_id: SourceId, text: &str, secs: i64, fields: &[(&str, &str)]) -> NewRecord {
        NewRecord {
            source_id,
            raw_text: text.into(),
            fields: fields.iter().copied().collect(),
            received_at: Utc.with_ymd_and_hms(2024, 5, 16, 0, 0, 0).unwrap()
                + Duration::seconds(secs),
        }
    }

    #[test]
    fn append_assigns_sequential_ids() {
        let store = MemoryStore::new();
        assert_eq!(store.append(record(1, "a", 0, &[])).unwrap(), RecordId(1));
        assert_eq!(store.append(record(1, "b", 1, &[])).unwrap(), RecordId(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn recent_is_newest_first_and_per_source() {
        let store = MemoryStore::new();
        store.append(record(1, "old", 0, &[])).unwrap();
        store.append(record(2, "other", 5, &[])).unwrap();
        store.append(record(1, "new", 10, &[])).unwrap();

        let recent = store.recent(1, 10).unwrap();
        let texts: Vec<_> = recent.iter().map(|r| r.raw_text.as_str()).collect();
        assert_eq!(texts, ["new", "old"]);

        assert_eq!(store.recent(1, 1).unwrap().len(), 1);
        assert_eq!(store.recent_all(10).unwrap()[0].raw_text, "new");
        assert!(store.recent(3, 10).unwrap().is_empty());
    }

    #[test]
    fn field_lookup_uses_only_given_predicates() {
        let store = MemoryStore::new();
        store
            .append(record(1, "x", 0, &[("date", "2024-05-16"), ("name", "Анна")]))
            .unwrap();

        let partial: ExtractedFields = [("date", "2024-05-16")].into_iter().collect();
        assert!(store.by_source_and_fields(1, &partial).unwrap().is_some());
        assert!(store.by_source_and_fields(2, &partial).unwrap().is_none());

        let mismatch: ExtractedFields = [("date", "2024-05-16"), ("name", "Олег")]
            .into_iter()
            .collect();
        assert!(store.by_source_and_fields(1, &mismatch).unwrap().is_none());

        assert!(
            store
                .by_source_and_fields(1, &ExtractedFields::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn config_backing_replaces_by_source() {
        let store = MemoryStore::new();
        let mut cfg = SourceConfig::with_defaults(1);
        store.save_config(&cfg).unwrap();
        cfg.active = false;
        store.save_config(&cfg).unwrap();
        let loaded = store.load_configs().unwrap();
        assert_eq!(loaded, vec![cfg]);
    }
}
