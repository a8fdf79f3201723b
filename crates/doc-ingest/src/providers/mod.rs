//! Provider abstractions for the LLM, tokenizer, vector store and reranker
//!
//! The pipeline only talks to these traits; `VllmClient` is the shipped
//! backend for both the LLM and the tokenizer.

pub mod llm;
pub mod tokenizer;
pub mod vector_store;
pub mod vllm;

pub use llm::{ChatRequest, LlmService, Outcome};
pub use tokenizer::Tokenizer;
pub use vector_store::{Reranker, SearchHit, SearchMode, VectorStore};
pub use vllm::{shared_http_client, VllmClient};
