//! Rule-based field extraction from literal tag markers.
//!
//! A tag rule `("Дата:", "date")` extracts whatever follows the first
//! occurrence of `Дата:` up to the end of that line.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::fields::ExtractedFields;
use crate::types::SourceId;

/// Extract fields from `raw_text` using ordered `(tag, field)` rules.
///
/// - Only the first occurrence of a tag is used.
/// - The value runs to the next `\n` (or end of text) and is trimmed.
/// - Blank values count as not found.
/// - When two rules target the same field, the earlier rule wins.
pub fn extract(raw_text: &str, rules: &[(String, String)]) -> ExtractedFields {
    let mut fields = ExtractedFields::new();
    for (tag, field) in rules {
        if tag.is_empty() || fields.contains(field) {
            continue;
        }
        if let Some(value) = value_after(raw_text, tag) {
            fields.insert_if_absent(field, value);
        }
    }
    fields
}

fn value_after<'a>(raw_text: &'a str, tag: &str) -> Option<&'a str> {
    let start = raw_text.find(tag)? + tag.len();
    let rest = &raw_text[start..];
    let line = match rest.find('\n') {
        Some(end) => &rest[..end],
        None => rest,
    };
    let value = line.trim();
    (!value.is_empty()).then_some(value)
}

/// Distinct tag-extracted values per source and field, in first-seen order.
///
/// Inspection aid only; nothing in extraction or dedup reads it.
#[derive(Debug, Default)]
pub struct TagValueLog {
    values: Mutex<HashMap<SourceId, BTreeMap<String, Vec<String>>>>,
}

impl TagValueLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every value in `fields`. Returns how many were new.
    pub fn record(&self, source_id: SourceId, fields: &ExtractedFields) -> usize {
        let mut values = self.values.lock();
        let per_source = values.entry(source_id).or_default();
        let mut added = 0;
        for (field, value) in fields.iter() {
            let seen = per_source.entry(field.to_string()).or_default();
            if !seen.iter().any(|v| v == value) {
                seen.push(value.to_string());
                added += 1;
            }
        }
        added
    }

    /// All recorded values for a source, keyed by field.
    pub fn values(&self, source_id: SourceId) -> BTreeMap<String, Vec<String>> {
        self.values
            .lock()
            .get(&source_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Recorded values of one field for a source.
    pub fn field_values(&self, source_id: SourceId, field: &str) -> Vec<String> {
        self.values
            .lock()
            .get(&source_id)
            .and_then(|fields| fields.get(field).cloned())
            .unwrap_or_default()
    }
}
