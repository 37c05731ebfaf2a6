//! Duplicate detection against the record store.

use std::sync::Arc;

use chatsift_core::{ExtractedFields, SourceId, similarity};
use chatsift_store::RecordStore;
use tracing::{debug, warn};

pub const DEFAULT_WINDOW: usize = 10;

/// How a new message is compared with stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStrategy {
    /// Edit-distance similarity of raw text against the `window` most recent
    /// records of the source.
    Similarity { window: usize },
    /// A stored record of the source equals every extracted field.
    FieldEquality,
}

impl Default for DedupStrategy {
    fn default() -> Self {
        DedupStrategy::Similarity {
            window: DEFAULT_WINDOW,
        }
    }
}

pub struct DuplicateDetector {
    store: Arc<dyn RecordStore>,
    strategy: DedupStrategy,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn RecordStore>, strategy: DedupStrategy) -> Self {
        Self { store, strategy }
    }

    pub fn strategy(&self) -> DedupStrategy {
        self.strategy
    }

    /// Whether the message duplicates something already stored for `source_id`.
    ///
    /// A `threshold` of zero or below marks every message a duplicate without
    /// consulting the store. Under [`DedupStrategy::FieldEquality`] the
    /// threshold has no other effect, and an empty `fields` never matches.
    /// Store read failures are logged and count as "not a duplicate".
    pub fn is_duplicate(
        &self,
        source_id: SourceId,
        raw_text: &str,
        fields: &ExtractedFields,
        threshold: f64,
    ) -> bool {
        if threshold <= 0.0 {
            debug!(source_id, "threshold is zero, treating as duplicate");
            return true;
        }

        match self.strategy {
            DedupStrategy::Similarity { window } => {
                let recent = match self.store.recent(source_id, window) {
                    Ok(recent) => recent,
                    Err(e) => {
                        warn!(source_id, error = %e, "dedup lookup failed");
                        return false;
                    }
                };
                let hit = recent.iter().find_map(|record| {
                    let ratio = similarity(raw_text, &record.raw_text);
                    (ratio >= threshold).then_some((record.id, ratio))
                });
                if let Some((record_id, ratio)) = hit {
                    debug!(source_id, %record_id, ratio, threshold, "similar record found");
                    return true;
                }
                false
            }
            DedupStrategy::FieldEquality => {
                if fields.is_empty() {
                    return false;
                }
                match self.store.by_source_and_fields(source_id, fields) {
                    Ok(found) => found.is_some(),
                    Err(e) => {
                        warn!(source_id, error = %e, "dedup lookup failed");
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_core::{NewRecord, RecordId, StoredRecord};
    use chatsift_store::{MemoryStore, StoreError};
    use chrono::{Duration, TimeZone, Utc};

    fn store_with(texts: &[(&str, &[(&str, &str)])]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let base = Utc.with_ymd_and_hms(2024, 5, 16, 0, 0, 0).unwrap();
        for (i, (text, fields)) in texts.iter().enumerate() {
            store
                .append(NewRecord {
                    source_id: 1,
                    raw_text: text.to_string(),
                    fields: fields.iter().copied().collect(),
                    received_at: base + Duration::seconds(i as i64),
                })
                .unwrap();
        }
        store
    }

    fn similarity_detector(store: Arc<MemoryStore>) -> DuplicateDetector {
        DuplicateDetector::new(store, DedupStrategy::default())
    }

    struct Broken;

    impl RecordStore for Broken {
        fn append(&self, _record: NewRecord) -> Result<RecordId, StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        fn recent(&self, _: SourceId, _: usize) -> Result<Vec<StoredRecord>, StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        fn recent_all(&self, _: usize) -> Result<Vec<StoredRecord>, StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        fn by_source_and_fields(
            &self,
            _: SourceId,
            _: &ExtractedFields,
        ) -> Result<Option<StoredRecord>, StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
    }

    // ── Similarity ──

    #[test]
    fn identical_text_at_full_threshold() {
        let detector = similarity_detector(store_with(&[("Дата: 2024-05-16", &[])]));
        let none = ExtractedFields::new();
        assert!(detector.is_duplicate(1, "Дата: 2024-05-16", &none, 1.0));
        assert!(!detector.is_duplicate(1, "Дата: 2024-05-17", &none, 1.0));
    }

    #[test]
    fn near_duplicate_above_threshold() {
        let detector = similarity_detector(store_with(&[("Продам диван, звоните", &[])]));
        let none = ExtractedFields::new();
        assert!(detector.is_duplicate(1, "Продам диван, звоните!", &none, 0.9));
        assert!(!detector.is_duplicate(1, "Куплю велосипед", &none, 0.9));
    }

    #[test]
    fn empty_history_is_never_duplicate() {
        let detector = similarity_detector(Arc::new(MemoryStore::new()));
        assert!(!detector.is_duplicate(1, "текст", &ExtractedFields::new(), 0.5));
    }

    #[test]
    fn other_sources_are_ignored() {
        let detector = similarity_detector(store_with(&[("одинаковый текст", &[])]));
        assert!(!detector.is_duplicate(2, "одинаковый текст", &ExtractedFields::new(), 0.9));
    }

    #[test]
    fn window_limits_candidates() {
        let mut texts: Vec<(&str, &[(&str, &str)])> = vec![("старое сообщение", &[])];
        texts.extend(std::iter::repeat_n(("zzzzzzzzzzzzzzzz", &[][..]), 3));
        let store = store_with(&texts);
        let narrow = DuplicateDetector::new(store.clone(), DedupStrategy::Similarity { window: 3 });
        let wide = DuplicateDetector::new(store, DedupStrategy::Similarity { window: 4 });
        let none = ExtractedFields::new();
        assert!(!narrow.is_duplicate(1, "старое сообщение", &none, 1.0));
        assert!(wide.is_duplicate(1, "старое сообщение", &none, 1.0));
    }

    #[test]
    fn zero_threshold_is_always_duplicate() {
        let detector = DuplicateDetector::new(Arc::new(Broken), DedupStrategy::default());
        assert!(detector.is_duplicate(1, "anything", &ExtractedFields::new(), 0.0));
        let fields = DuplicateDetector::new(Arc::new(Broken), DedupStrategy::FieldEquality);
        assert!(fields.is_duplicate(1, "anything", &ExtractedFields::new(), 0.0));
    }

    #[test]
    fn store_failure_is_not_duplicate() {
        let detector = DuplicateDetector::new(Arc::new(Broken), DedupStrategy::default());
        assert!(!detector.is_duplicate(1, "text", &ExtractedFields::new(), 0.7));
    }

    // ── Field equality ──

    #[test]
    fn field_equality_matches_on_present_fields_only() {
        let store = store_with(&[("a", &[("date", "2024-05-16"), ("name", "Анна")])]);
        let detector = DuplicateDetector::new(store, DedupStrategy::FieldEquality);
        let partial: ExtractedFields = [("date", "2024-05-16")].into_iter().collect();
        assert!(detector.is_duplicate(1, "совсем другой текст", &partial, 0.7));
        let different: ExtractedFields = [("date", "2024-05-17")].into_iter().collect();
        assert!(!detector.is_duplicate(1, "a", &different, 0.7));
    }

    #[test]
    fn empty_fields_never_match_by_equality_but_may_by_similarity() {
        let store = store_with(&[("без тегов", &[])]);
        let none = ExtractedFields::new();
        let by_fields = DuplicateDetector::new(store.clone(), DedupStrategy::FieldEquality);
        assert!(!by_fields.is_duplicate(1, "без тегов", &none, 0.7));
        assert!(similarity_detector(store).is_duplicate(1, "без тегов", &none, 0.7));
    }
}
