/// Arrow schema definitions for persisted message records.
pub mod messages {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int64Array, StringArray, TimestampMicrosecondArray};
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use arrow::error::ArrowError;
    use arrow::record_batch::RecordBatch;

    use crate::fields::KNOWN_FIELDS;
    use crate::types::StoredRecord;

    /// Schema for the append-only `messages` table.
    ///
    /// One nullable column per known field; anything else goes into `extra`
    /// as a JSON object.
    pub fn messages_schema() -> Schema {
        let mut fields = vec![
            Field::new("id", DataType::Int64, false),
            Field::new("source_id", DataType::Int64, false),
            Field::new("raw_text", DataType::Utf8, false),
        ];
        fields.extend(
            KNOWN_FIELDS
                .iter()
                .map(|name| Field::new(*name, DataType::Utf8, true)),
        );
        fields.push(Field::new("extra", DataType::Utf8, true));
        fields.push(Field::new(
            "received_at",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ));
        Schema::new(fields)
    }

    /// Convert records into a single batch matching [`messages_schema`].
    pub fn records_to_batch(records: &[StoredRecord]) -> Result<RecordBatch, ArrowError> {
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(
                records.iter().map(|r| r.id.0).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(
                records.iter().map(|r| r.source_id).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                records.iter().map(|r| r.raw_text.as_str()).collect::<Vec<_>>(),
            )),
        ];

        for name in KNOWN_FIELDS {
            columns.push(Arc::new(StringArray::from(
                records
                    .iter()
                    .map(|r| r.fields.get(name))
                    .collect::<Vec<_>>(),
            )));
        }

        let mut extra = Vec::with_capacity(records.len());
        for record in records {
            let map = record.fields.extra();
            if map.is_empty() {
                extra.push(None);
            } else {
                let json = serde_json::to_string(&map)
                    .map_err(|e| ArrowError::ExternalError(Box::new(e)))?;
                extra.push(Some(json));
            }
        }
        columns.push(Arc::new(StringArray::from(extra)));

        columns.push(Arc::new(
            TimestampMicrosecondArray::from(
                records
                    .iter()
                    .map(|r| r.received_at.timestamp_micros())
                    .collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ));

        RecordBatch::try_new(Arc::new(messages_schema()), columns)
    }
}
