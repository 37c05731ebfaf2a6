use thiserror::Error;

/// Persistence failure. Workers treat any of these as "drop the item".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no results for query")]
    NoResults,

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected column layout: {0}")]
    Schema(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
