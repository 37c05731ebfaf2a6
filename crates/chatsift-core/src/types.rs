//! Shared pipeline types: source configuration, queue items, and records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fields::ExtractedFields;

/// Identity of a chat/channel whose messages are configured and processed independently.
pub type SourceId = i64;

/// Default duplicate-similarity threshold for a new source.
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.7;

/// Built-in tag rules, in evaluation order. Tag literals are matched verbatim.
pub const DEFAULT_TAG_RULES: &[(&str, &str)] = &[
    ("Дата:", "date"),
    ("Адрес:", "address"),
    ("Имя:", "name"),
    ("Телефон:", "phone"),
];

/// A literal marker string mapped to a named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub field: String,
    pub active: bool,
}

impl TagRule {
    pub fn new(tag: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            field: field.into(),
            active: true,
        }
    }
}

/// Per-source extraction and dedup settings.
///
/// Owned by [`ConfigStore`](crate::ConfigStore); pipeline stages only ever see
/// immutable snapshots of it. At most one rule per distinct `tag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: SourceId,
    /// Ordered rule list; order is evaluation order for the tag extractor.
    pub tag_rules: Vec<TagRule>,
    pub use_auxiliary: bool,
    pub duplicate_threshold: f64,
    pub active: bool,
}

impl SourceConfig {
    /// A fresh config with the built-in rule set.
    pub fn with_defaults(source_id: SourceId) -> Self {
        Self {
            source_id,
            tag_rules: DEFAULT_TAG_RULES
                .iter()
                .map(|(tag, field)| TagRule::new(*tag, *field))
                .collect(),
            use_auxiliary: true,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            active: true,
        }
    }

    pub fn rule(&self, tag: &str) -> Option<&TagRule> {
        self.tag_rules.iter().find(|r| r.tag == tag)
    }

    /// Active rules as ordered `(tag, field)` pairs.
    ///
    /// An empty rule list falls back to [`DEFAULT_TAG_RULES`]; a non-empty list
    /// with every rule switched off yields nothing.
    pub fn active_tag_rules(&self) -> Vec<(String, String)> {
        if self.tag_rules.is_empty() {
            return default_tag_rules();
        }
        self.tag_rules
            .iter()
            .filter(|r| r.active)
            .map(|r| (r.tag.clone(), r.field.clone()))
            .collect()
    }
}

/// [`DEFAULT_TAG_RULES`] as owned pairs.
pub fn default_tag_rules() -> Vec<(String, String)> {
    DEFAULT_TAG_RULES
        .iter()
        .map(|(tag, field)| (tag.to_string(), field.to_string()))
        .collect()
}

/// A message handed from the ingestion path to the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub source_id: SourceId,
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(
        source_id: SourceId,
        raw_text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id,
            raw_text: raw_text.into(),
            received_at,
        }
    }
}

/// Store-assigned identity of a committed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub source_id: SourceId,
    pub raw_text: String,
    pub fields: ExtractedFields,
    pub received_at: DateTime<Utc>,
}

impl NewRecord {
    pub fn from_item(item: QueueItem, fields: ExtractedFields) -> Self {
        Self {
            source_id: item.source_id,
            raw_text: item.raw_text,
            fields,
            received_at: item.received_at,
        }
    }
}

/// A committed, append-only record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub source_id: SourceId,
    pub raw_text: String,
    pub fields: ExtractedFields,
    pub received_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn from_new(id: RecordId, record: NewRecord) -> Self {
        Self {
            id,
            source_id: record.source_id,
            raw_text: record.raw_text,
            fields: record.fields,
            received_at: record.received_at,
        }
    }
}

/// Char-boundary-safe prefix of `text` for log lines and previews.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_builtin_rules() {
        let cfg = SourceConfig::with_defaults(7);
        assert_eq!(cfg.tag_rules.len(), 4);
        assert!(cfg.use_auxiliary);
        assert!(cfg.active);
        assert_eq!(cfg.duplicate_threshold, 0.7);
        assert_eq!(cfg.active_tag_rules(), default_tag_rules());
    }

    #[test]
    fn empty_rule_list_falls_back_to_defaults() {
        let mut cfg = SourceConfig::with_defaults(1);
        cfg.tag_rules.clear();
        assert_eq!(cfg.active_tag_rules(), default_tag_rules());
    }

    #[test]
    fn all_rules_inactive_yields_nothing() {
        let mut cfg = SourceConfig::with_defaults(1);
        for rule in &mut cfg.tag_rules {
            rule.active = false;
        }
        assert!(cfg.active_tag_rules().is_empty());
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("Адрес", 3), "Адр...");
        assert_eq!(preview("short", 10), "short");
    }
}
