//! Contract for supplementary (model- or heuristic-based) field extraction.

use chatsift_core::ExtractedFields;
use thiserror::Error;

/// Failure of an auxiliary extractor. Never fatal to the pipeline: callers
/// degrade to tag-only output.
#[derive(Debug, Error)]
pub enum AuxiliaryError {
    #[error("auxiliary extractor unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("could not parse extractor reply: {0}")]
    Parse(String),
}

/// Supplementary extraction from raw message text.
///
/// Called concurrently from every worker thread.
pub trait AuxiliaryExtractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Extract whatever fields the extractor can find. Values are trimmed and
    /// non-empty; missing fields are simply absent.
    fn extract(&self, raw_text: &str) -> Result<ExtractedFields, AuxiliaryError>;
}
