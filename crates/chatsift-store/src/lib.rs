//! Storage layer: append-only message records and durable source configs.

mod backend;
mod error;
mod memory;

pub use backend::{ConfigBacking, RecordStore};
pub use error::StoreError;
pub use memory::MemoryStore;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
