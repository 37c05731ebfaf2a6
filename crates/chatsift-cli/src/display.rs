//! Vertical card and table rendering for stored message records.
//!
//! Works on Arrow batches shaped by `chatsift_core::messages::messages_schema`,
//! so the same code renders records from any store backend.

use arrow::array::*;
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use chatsift_core::{KNOWN_FIELDS, preview};

const TEXT_PREVIEW_CHARS: usize = 100;
const SEPARATOR_WIDTH: usize = 30;

// ── Public API ──

/// One card per row, in batch order.
pub fn render_cards(batch: &RecordBatch) -> String {
    let mut out = String::new();
    for row in 0..batch.num_rows() {
        render_card(batch, row, &mut out);
    }
    out
}

/// Arrow's ASCII table, with raw text cut to a preview.
pub fn render_table(batch: &RecordBatch) -> Result<String, ArrowError> {
    let shortened = shorten_text_column(batch)?;
    Ok(arrow::util::pretty::pretty_format_batches(&[shortened])?.to_string())
}

// ── Cards ──

fn render_card(batch: &RecordBatch, row: usize, out: &mut String) {
    let id = get_i64(batch, "id", row).map(|v| v.to_string()).unwrap_or_default();
    out.push_str(&format!("Record #{} (id {id})\n", row + 1));

    if let Some(source_id) = get_i64(batch, "source_id", row) {
        out.push_str(&format!("  {:<12} {source_id}\n", "source"));
    }
    if let Some(received) = get_formatted(batch, "received_at", row) {
        out.push_str(&format!("  {:<12} {received}\n", "received_at"));
    }
    for &field in KNOWN_FIELDS {
        if let Some(value) = get_utf8(batch, field, row) {
            out.push_str(&format!("  {field:<12} {value}\n"));
        }
    }
    if let Some(extra) = get_utf8(batch, "extra", row) {
        out.push_str(&format!("  {:<12} {extra}\n", "extra"));
    }
    if let Some(text) = get_utf8(batch, "raw_text", row)
        && !text.is_empty()
    {
        let text = preview(text, TEXT_PREVIEW_CHARS).replace('\n', " | ");
        out.push_str(&format!("  {:<12} {text}\n", "text"));
    }
    out.push_str(&"-".repeat(SEPARATOR_WIDTH));
    out.push_str("\n\n");
}

fn shorten_text_column(batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let Ok(idx) = batch.schema().index_of("raw_text") else {
        return Ok(batch.clone());
    };
    let col = batch.column(idx);
    let short: StringArray = (0..batch.num_rows())
        .map(|row| col_str(col.as_ref(), row).map(|s| preview(s, 40).replace('\n', " ")))
        .collect();
    let mut columns = batch.columns().to_vec();
    columns[idx] = std::sync::Arc::new(short);
    RecordBatch::try_new(batch.schema(), columns)
}

// ── Helpers ──

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a ArrayRef> {
    let idx = batch.schema().index_of(name).ok()?;
    Some(batch.column(idx))
}

fn get_utf8<'a>(batch: &'a RecordBatch, name: &str, row: usize) -> Option<&'a str> {
    col_str(column(batch, name)?.as_ref(), row)
}

fn get_i64(batch: &RecordBatch, name: &str, row: usize) -> Option<i64> {
    let col = column(batch, name)?;
    if col.is_null(row) || col.data_type() != &DataType::Int64 {
        return None;
    }
    col.as_any().downcast_ref::<Int64Array>().map(|a| a.value(row))
}

/// Arrow's display formatting; used for timestamps.
fn get_formatted(batch: &RecordBatch, name: &str, row: usize) -> Option<String> {
    let col = column(batch, name)?;
    if col.is_null(row) {
        return None;
    }
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(col.as_ref(), &options).ok()?;
    Some(formatter.value(row).to_string())
}

/// Get a string value from a column that might be Utf8 or LargeUtf8.
fn col_str(col: &dyn Array, i: usize) -> Option<&str> {
    if col.is_null(i) {
        return None;
    }
    if let Some(arr) = col.as_any().downcast_ref::<StringArray>() {
        return Some(arr.value(i));
    }
    if let Some(arr) = col.as_any().downcast_ref::<LargeStringArray>() {
        return Some(arr.value(i));
    }
    None
}
