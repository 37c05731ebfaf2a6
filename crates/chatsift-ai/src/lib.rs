//! Auxiliary field extraction: regex heuristics and an LLM chat-completions client.

mod auxiliary;
pub mod heuristic;
pub mod llm;

pub use auxiliary::{AuxiliaryError, AuxiliaryExtractor};
pub use heuristic::{HeuristicExtractor, normalize_date};
pub use llm::{LlmConfig, LlmExtractor, parse_reply};
