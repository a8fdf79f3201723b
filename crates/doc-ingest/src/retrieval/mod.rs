//! Retrieval over the ingested documents

pub mod search;

pub use search::{reset_store, search_only};
