pub mod config;
pub mod fields;
pub mod schema;
pub mod similarity;
pub mod tags;
pub mod types;

pub use config::{ConfigMutation, ConfigStore, ValidationError};
pub use fields::{ExtractedFields, KNOWN_FIELDS, merge};
pub use schema::messages;
pub use similarity::similarity;
pub use tags::TagValueLog;
pub use types::{
    DEFAULT_DUPLICATE_THRESHOLD, DEFAULT_TAG_RULES, NewRecord, QueueItem, RecordId, SourceConfig,
    SourceId, StoredRecord, TagRule, default_tag_rules, preview,
};
