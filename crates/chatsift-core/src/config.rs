//! Per-source configuration store.
//!
//! Entries are immutable [`SourceConfig`] snapshots behind `Arc`s in a sharded
//! concurrent map. Mutations clone the current snapshot, validate, apply, and
//! swap it in while holding the entry's shard lock, so updates for one source
//! are serialized and readers only ever hold a complete old or new snapshot.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{SourceConfig, SourceId, TagRule, default_tag_rules};

/// A rejected configuration mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("duplicate threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("tag must not be empty")]
    EmptyTag,

    #[error("field must not be empty")]
    EmptyField,

    #[error("tag '{0}' already exists")]
    DuplicateTag(String),

    #[error("tag '{0}' not found")]
    UnknownTag(String),
}

/// A single configuration change for one source.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigMutation {
    AddRule { tag: String, field: String },
    ToggleRule { tag: String },
    SetThreshold(f64),
    SetAuxiliary(bool),
    SetActive(bool),
}

impl ConfigMutation {
    fn apply(&self, config: &mut SourceConfig) -> Result<(), ValidationError> {
        match self {
            Self::AddRule { tag, field } => {
                let tag = tag.trim();
                let field = field.trim();
                if tag.is_empty() {
                    return Err(ValidationError::EmptyTag);
                }
                if field.is_empty() {
                    return Err(ValidationError::EmptyField);
                }
                if config.rule(tag).is_some() {
                    return Err(ValidationError::DuplicateTag(tag.to_string()));
                }
                config.tag_rules.push(TagRule::new(tag, field));
            }
            Self::ToggleRule { tag } => {
                let tag = tag.trim();
                let rule = config
                    .tag_rules
                    .iter_mut()
                    .find(|r| r.tag == tag)
                    .ok_or_else(|| ValidationError::UnknownTag(tag.to_string()))?;
                rule.active = !rule.active;
            }
            Self::SetThreshold(threshold) => {
                if !threshold.is_finite() || !(0.0..=1.0).contains(threshold) {
                    return Err(ValidationError::ThresholdOutOfRange(*threshold));
                }
                config.duplicate_threshold = *threshold;
            }
            Self::SetAuxiliary(enabled) => config.use_auxiliary = *enabled,
            Self::SetActive(active) => config.active = *active,
        }
        Ok(())
    }
}

/// Concurrency-safe source → config map.
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: DashMap<SourceId, Arc<SourceConfig>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from durable snapshots.
    pub fn hydrate(configs: impl IntoIterator<Item = SourceConfig>) -> Self {
        let store = Self::new();
        for config in configs {
            store.entries.insert(config.source_id, Arc::new(config));
        }
        info!(sources = store.entries.len(), "hydrated source configs");
        store
    }

    /// Current snapshot, creating a default config for an unknown source.
    pub fn get_or_create(&self, source_id: SourceId) -> Arc<SourceConfig> {
        self.register(source_id).0
    }

    /// Like [`get_or_create`](Self::get_or_create), also reporting whether the
    /// source was created by this call.
    pub fn register(&self, source_id: SourceId) -> (Arc<SourceConfig>, bool) {
        let mut created = false;
        let entry = self.entries.entry(source_id).or_insert_with(|| {
            debug!(source_id, "created default source config");
            created = true;
            Arc::new(SourceConfig::with_defaults(source_id))
        });
        (Arc::clone(entry.value()), created)
    }

    /// Current snapshot, if the source has been seen.
    pub fn get(&self, source_id: SourceId) -> Option<Arc<SourceConfig>> {
        self.entries.get(&source_id).map(|e| Arc::clone(e.value()))
    }

    /// Apply one mutation atomically. Unknown sources are created first.
    ///
    /// On error the stored snapshot is left untouched.
    pub fn update(
        &self,
        source_id: SourceId,
        mutation: ConfigMutation,
    ) -> Result<Arc<SourceConfig>, ValidationError> {
        self.update_with(source_id, mutation, |_| Ok(()))
    }

    /// Apply one mutation, then `commit` the new config before it goes live.
    ///
    /// `commit` runs under the entry lock; if it fails, readers keep seeing
    /// the previous snapshot.
    pub fn update_with<E>(
        &self,
        source_id: SourceId,
        mutation: ConfigMutation,
        commit: impl FnOnce(&SourceConfig) -> Result<(), E>,
    ) -> Result<Arc<SourceConfig>, E>
    where
        E: From<ValidationError>,
    {
        let mut entry = self
            .entries
            .entry(source_id)
            .or_insert_with(|| Arc::new(SourceConfig::with_defaults(source_id)));
        let mut next = SourceConfig::clone(entry.value());
        mutation.apply(&mut next)?;
        commit(&next)?;
        let next = Arc::new(next);
        *entry.value_mut() = Arc::clone(&next);
        info!(source_id, ?mutation, "source config updated");
        Ok(next)
    }

    /// Active `(tag, field)` pairs in evaluation order.
    ///
    /// Unknown sources get the built-in defaults without being created.
    pub fn active_tag_rules(&self, source_id: SourceId) -> Vec<(String, String)> {
        match self.get(source_id) {
            Some(config) => config.active_tag_rules(),
            None => default_tag_rules(),
        }
    }

    /// Snapshots of every known source, ordered by id.
    pub fn snapshot_all(&self) -> Vec<Arc<SourceConfig>> {
        let mut all: Vec<_> = self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by_key(|c| c.source_id);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
