//! DuckDB storage layer for extracted message records and source configs.

use std::path::Path;

use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, LargeStringArray, StringArray};
use arrow::record_batch::RecordBatch;
use chatsift_core::{
    ExtractedFields, KNOWN_FIELDS, NewRecord, RecordId, SourceConfig, SourceId, StoredRecord,
    TagRule,
};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use duckdb::types::Value;
use parking_lot::Mutex;
use tracing::info;

use crate::backend::{ConfigBacking, RecordStore, matches_fields};
use crate::StoreError;

const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS messages_id_seq START 1;
CREATE TABLE IF NOT EXISTS messages (
    id             BIGINT PRIMARY KEY DEFAULT nextval('messages_id_seq'),
    source_id      BIGINT  NOT NULL,
    raw_text       VARCHAR NOT NULL,
    "date"         VARCHAR,
    "address"      VARCHAR,
    "name"         VARCHAR,
    "phone"        VARCHAR,
    "email"        VARCHAR,
    "price"        VARCHAR,
    extra          VARCHAR,
    received_at_us BIGINT  NOT NULL
);
CREATE TABLE IF NOT EXISTS source_configs (
    source_id           BIGINT PRIMARY KEY,
    use_auxiliary       BOOLEAN NOT NULL,
    duplicate_threshold DOUBLE  NOT NULL,
    active              BOOLEAN NOT NULL,
    tag_rules           VARCHAR NOT NULL
);
"#;

const SELECT_MESSAGES: &str = r#"SELECT id, source_id, raw_text, "date", "address", "name",
    "phone", "email", "price", extra, received_at_us FROM messages"#;

/// DuckDB store for the `messages` append log and `source_configs` table.
///
/// `messages` keeps one row per committed record with a column per known
/// field and an `extra` JSON object for everything else. Rows are never
/// updated. `source_configs` is the durable backing of the config store; rule
/// lists are stored as JSON arrays.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// The connection sits behind a mutex, so all workers share one writer.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    ///
    /// Tables are created on first open and reused afterwards.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), records = store.record_count()?, "opened message store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Counts ──

    /// Number of rows in the `messages` table.
    pub fn record_count(&self) -> Result<usize, StoreError> {
        self.count_table("messages")
    }

    /// Number of rows in the `source_configs` table.
    pub fn config_count(&self) -> Result<usize, StoreError> {
        self.count_table("source_configs")
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table}");
        let batches = self.query_arrow(&sql, Vec::new())?;
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| StoreError::Schema("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    // ── Escape hatch ──

    /// Execute SQL with positional parameters and return Arrow RecordBatches.
    pub fn query_arrow(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<RecordBatch>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt
            .query_arrow(duckdb::params_from_iter(params))?
            .collect();
        Ok(batches)
    }

    fn query_records(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let batches = self.query_arrow(sql, params)?;
        let mut records = Vec::new();
        for batch in &batches {
            records.extend(decode_records(batch)?);
        }
        Ok(records)
    }
}

impl RecordStore for DuckStore {
    fn append(&self, record: NewRecord) -> Result<RecordId, StoreError> {
        let extra = record.fields.extra();
        let extra = if extra.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&extra)?)
        };
        let field = |name: &str| record.fields.get(name);

        let conn = self.conn.lock();
        let id: i64 = conn.query_row(
            r#"INSERT INTO messages
                (source_id, raw_text, "date", "address", "name", "phone", "email", "price", extra, received_at_us)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
            duckdb::params![
                record.source_id,
                record.raw_text,
                field("date"),
                field("address"),
                field("name"),
                field("phone"),
                field("email"),
                field("price"),
                extra,
                record.received_at.timestamp_micros(),
            ],
            |row| row.get(0),
        )?;
        Ok(RecordId(id))
    }

    fn recent(&self, source_id: SourceId, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let sql = format!(
            "{SELECT_MESSAGES} WHERE source_id = ? ORDER BY received_at_us DESC, id DESC LIMIT {limit}"
        );
        self.query_records(&sql, vec![Value::BigInt(source_id)])
    }

    fn recent_all(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let sql = format!("{SELECT_MESSAGES} ORDER BY received_at_us DESC, id DESC LIMIT {limit}");
        self.query_records(&sql, Vec::new())
    }

    fn by_source_and_fields(
        &self,
        source_id: SourceId,
        predicates: &ExtractedFields,
    ) -> Result<Option<StoredRecord>, StoreError> {
        if predicates.is_empty() {
            return Ok(None);
        }

        // Known fields are pushed down as column predicates; fields living in
        // the `extra` JSON are checked after decoding.
        let mut clauses = vec!["source_id = ?".to_string()];
        let mut params = vec![Value::BigInt(source_id)];
        let mut needs_scan = false;
        for (field, value) in predicates.iter() {
            if KNOWN_FIELDS.contains(&field) {
                clauses.push(format!("\"{field}\" = ?"));
                params.push(Value::Text(value.to_string()));
            } else {
                needs_scan = true;
            }
        }

        let limit = if needs_scan { String::new() } else { " LIMIT 1".into() };
        let sql = format!(
            "{SELECT_MESSAGES} WHERE {} ORDER BY received_at_us DESC, id DESC{limit}",
            clauses.join(" AND ")
        );
        Ok(self
            .query_records(&sql, params)?
            .into_iter()
            .find(|r| matches_fields(r, predicates)))
    }
}

impl ConfigBacking for DuckStore {
    fn save_config(&self, config: &SourceConfig) -> Result<(), StoreError> {
        let rules = serde_json::to_string(&config.tag_rules)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO source_configs
                (source_id, use_auxiliary, duplicate_threshold, active, tag_rules)
             VALUES (?, ?, ?, ?, ?)",
            duckdb::params![
                config.source_id,
                config.use_auxiliary,
                config.duplicate_threshold,
                config.active,
                rules,
            ],
        )?;
        Ok(())
    }

    fn load_configs(&self) -> Result<Vec<SourceConfig>, StoreError> {
        let batches = self.query_arrow(
            "SELECT source_id, use_auxiliary, duplicate_threshold, active, tag_rules
             FROM source_configs ORDER BY source_id",
            Vec::new(),
        )?;
        let mut configs = Vec::new();
        for batch in &batches {
            let source_id = i64_column(batch, "source_id")?;
            let use_auxiliary = bool_column(batch, "use_auxiliary")?;
            let threshold = batch
                .column_by_name("duplicate_threshold")
                .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                .ok_or_else(|| StoreError::Schema("duplicate_threshold not f64".into()))?;
            let active = bool_column(batch, "active")?;
            let rules_col = column(batch, "tag_rules")?;

            for row in 0..batch.num_rows() {
                let rules_json = get_string(rules_col, row)
                    .ok_or_else(|| StoreError::Schema(format!("null tag_rules at row {row}")))?;
                let tag_rules: Vec<TagRule> = serde_json::from_str(&rules_json)?;
                configs.push(SourceConfig {
                    source_id: source_id.value(row),
                    tag_rules,
                    use_auxiliary: use_auxiliary.value(row),
                    duplicate_threshold: threshold.value(row),
                    active: active.value(row),
                });
            }
        }
        Ok(configs)
    }
}

// ── Arrow decoding ──

fn decode_records(batch: &RecordBatch) -> Result<Vec<StoredRecord>, StoreError> {
    let ids = i64_column(batch, "id")?;
    let sources = i64_column(batch, "source_id")?;
    let received = i64_column(batch, "received_at_us")?;
    let raw_text = column(batch, "raw_text")?;
    let extra = column(batch, "extra")?;
    let field_cols = KNOWN_FIELDS
        .iter()
        .map(|name| column(batch, name).map(|col| (*name, col)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut fields = ExtractedFields::new();
        for (name, col) in &field_cols {
            if let Some(value) = get_string(*col, row) {
                fields.set(name, &value);
            }
        }
        if let Some(json) = get_string(extra, row) {
            let map: std::collections::BTreeMap<String, String> = serde_json::from_str(&json)?;
            for (name, value) in &map {
                fields.set(name, value);
            }
        }

        let micros = received.value(row);
        let received_at = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| StoreError::Schema(format!("timestamp out of range: {micros}")))?;

        records.push(StoredRecord {
            id: RecordId(ids.value(row)),
            source_id: sources.value(row),
            raw_text: get_string(raw_text, row).unwrap_or_default(),
            fields,
            received_at,
        });
    }
    Ok(records)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a dyn Array, StoreError> {
    batch
        .column_by_name(name)
        .map(|c| c.as_ref())
        .ok_or_else(|| StoreError::Schema(format!("missing '{name}' column")))
}

fn i64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array, StoreError> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| StoreError::Schema(format!("'{name}' column not i64")))
}

fn bool_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a BooleanArray, StoreError> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| StoreError::Schema(format!("'{name}' column not boolean")))
}

/// Read a nullable string cell from either `Utf8` or `LargeUtf8`.
fn get_string(col: &dyn Array, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    if let Some(arr) = col.as_any().downcast_ref::<StringArray>() {
        Some(arr.value(row).to_string())
    } else {
        col.as_any()
            .downcast_ref::<LargeStringArray>()
            .map(|arr| arr.value(row).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

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
    fn open_in_memory() {
        let store = DuckStore::open().unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
        assert_eq!(store.config_count().unwrap(), 0);
    }

    #[test]
    fn append_and_read_back() {
        let store = DuckStore::open().unwrap();
        let id = store
            .append(record(
                1,
                "Дата: 2024-05-16\nАдрес: ул. Ленина 10",
                0,
                &[("date", "2024-05-16"), ("address", "ул. Ленина 10"), ("code", "X1")],
            ))
            .unwrap();

        let recent = store.recent(1, 10).unwrap();
        assert_eq!(recent.len(), 1);
        let r = &recent[0];
        assert_eq!(r.id, id);
        assert_eq!(r.raw_text, "Дата: 2024-05-16\nАдрес: ул. Ленина 10");
        assert_eq!(r.fields.get("address"), Some("ул. Ленина 10"));
        assert_eq!(r.fields.get("code"), Some("X1"));
        assert!(r.fields.get("phone").is_none());
        assert_eq!(
            r.received_at,
            Utc.with_ymd_and_hms(2024, 5, 16, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn ids_increase() {
        let store = DuckStore::open().unwrap();
        let a = store.append(record(1, "a", 0, &[])).unwrap();
        let b = store.append(record(1, "b", 1, &[])).unwrap();
        assert!(b > a);
    }

    #[test]
    fn recent_orders_newest_first() {
        let store = DuckStore::open().unwrap();
        store.append(record(1, "old", 0, &[])).unwrap();
        store.append(record(2, "other", 5, &[])).unwrap();
        store.append(record(1, "new", 10, &[])).unwrap();

        let texts: Vec<_> = store
            .recent(1, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.raw_text)
            .collect();
        assert_eq!(texts, ["new", "old"]);
        assert_eq!(store.recent(1, 1).unwrap().len(), 1);
        assert_eq!(store.recent_all(2).unwrap().len(), 2);
    }

    #[test]
    fn field_lookup_on_columns_and_extra() {
        let store = DuckStore::open().unwrap();
        store
            .append(record(1, "x", 0, &[("date", "2024-05-16"), ("code", "X1")]))
            .unwrap();

        let by_column: ExtractedFields = [("date", "2024-05-16")].into_iter().collect();
        assert!(store.by_source_and_fields(1, &by_column).unwrap().is_some());
        assert!(store.by_source_and_fields(2, &by_column).unwrap().is_none());

        let by_extra: ExtractedFields = [("date", "2024-05-16"), ("code", "X1")]
            .into_iter()
            .collect();
        assert!(store.by_source_and_fields(1, &by_extra).unwrap().is_some());

        let wrong_extra: ExtractedFields = [("code", "X2")].into_iter().collect();
        assert!(store.by_source_and_fields(1, &wrong_extra).unwrap().is_none());

        assert!(
            store
                .by_source_and_fields(1, &ExtractedFields::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn config_save_and_load() {
        let store = DuckStore::open().unwrap();
        let mut cfg = SourceConfig::with_defaults(9);
        cfg.tag_rules[1].active = false;
        cfg.duplicate_threshold = 0.9;
        store.save_config(&cfg).unwrap();

        cfg.use_auxiliary = false;
        store.save_config(&cfg).unwrap();

        let loaded = store.load_configs().unwrap();
        assert_eq!(loaded, vec![cfg]);
    }

    // ── Persistent storage tests ──

    #[test]
    fn open_persistent_creates_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("test.duckdb");
        assert!(!db_path.exists());

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn persistent_records_survive_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("test.duckdb");

        let store = DuckStore::open_persistent(&db_path).unwrap();
        store
            .append(record(1, "Имя: Анна", 0, &[("name", "Анна")]))
            .unwrap();
        store.save_config(&SourceConfig::with_defaults(1)).unwrap();
        drop(store);

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert_eq!(store.record_count().unwrap(), 1);
        assert_eq!(store.recent(1, 10).unwrap()[0].fields.get("name"), Some("Анна"));
        assert_eq!(store.load_configs().unwrap().len(), 1);

        // Sequence continues after reopen.
        let id = store.append(record(1, "second", 1, &[])).unwrap();
        assert_eq!(id, RecordId(2));
    }
}
