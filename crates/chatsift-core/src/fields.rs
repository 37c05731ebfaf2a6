//! Extracted field maps and the tag-first merge policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field names with dedicated storage columns.
pub const KNOWN_FIELDS: &[&str] = &["date", "address", "name", "phone", "email", "price"];

/// Field name → extracted value.
///
/// Values are never empty: an empty (after trimming) value means "not found"
/// and is kept out of the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedFields(BTreeMap<String, String>);

impl ExtractedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Insert unless the field already has a value. Returns `true` if inserted.
    ///
    /// Blank values are ignored.
    pub fn insert_if_absent(&mut self, field: &str, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() || self.0.contains_key(field) {
            return false;
        }
        self.0.insert(field.to_string(), value.to_string());
        true
    }

    /// Insert, replacing any previous value. Blank values are ignored.
    pub fn set(&mut self, field: &str, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.0.insert(field.to_string(), value.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields outside [`KNOWN_FIELDS`], for open-map storage.
    pub fn extra(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExtractedFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            let v: String = v.into();
            fields.set(&k.into(), &v);
        }
        fields
    }
}

/// Merge tag-rule output with auxiliary output.
///
/// Tag values always win; auxiliary values only fill fields the tag rules
/// left empty.
pub fn merge(tag_fields: ExtractedFields, auxiliary_fields: &ExtractedFields) -> ExtractedFields {
    let mut merged = tag_fields;
    for (field, value) in auxiliary_fields.iter() {
        merged.insert_if_absent(field, value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> ExtractedFields {
        pairs.iter().copied().collect()
    }

    #[test]
    fn merge_keeps_tag_value() {
        let merged = merge(
            fields(&[("date", "A")]),
            &fields(&[("date", "B"), ("phone", "X")]),
        );
        assert_eq!(merged, fields(&[("date", "A"), ("phone", "X")]));
    }

    #[test]
    fn merge_with_empty_auxiliary_is_identity() {
        let tags = fields(&[("name", "Иван")]);
        assert_eq!(merge(tags.clone(), &ExtractedFields::new()), tags);
    }

    #[test]
    fn blank_values_are_not_stored() {
        let mut f = ExtractedFields::new();
        assert!(!f.insert_if_absent("date", "   "));
        f.set("phone", "");
        assert!(f.is_empty());
    }

    #[test]
    fn extra_excludes_known_fields() {
        let f = fields(&[("date", "2024-05-16"), ("password", "hunter2")]);
        let extra = f.extra();
        assert_eq!(extra.len(), 1);
        assert_eq!(extra["password"], "hunter2");
    }

    #[test]
    fn serializes_as_plain_object() {
        let f = fields(&[("date", "2024-05-16")]);
        assert_eq!(serde_json::to_string(&f).unwrap(), r#"{"date":"2024-05-16"}"#);
    }
}
