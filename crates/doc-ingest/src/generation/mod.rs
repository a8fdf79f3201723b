//! Answer generation over ingested documents

pub mod chat;
pub mod prompt;

pub use chat::stream_answer;
pub use prompt::{build_context, truncate_context, PromptTemplate};
