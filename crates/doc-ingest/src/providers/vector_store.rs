//! Vector store abstraction for the retrieval documents

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::RetrievalDocument;

/// Search strategy requested from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Dense,
    Sparse,
    Hybrid,
}

/// A ranked search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: RetrievalDocument,
    pub score: f32,
}

/// Trait for the external vector store
///
/// Embedding is the store's concern: implementations own their embedder.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and insert documents
    async fn insert(&self, documents: &[RetrievalDocument]) -> Result<()>;

    /// Ranked search
    async fn search(&self, query: &str, mode: SearchMode, top_k: usize) -> Result<Vec<SearchHit>>;

    /// Drop every document in the index
    async fn reset(&self) -> Result<()>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Trait for a cross-encoder reranking service
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each document against the query; returns `(index, score)` pairs,
    /// best first
    async fn rerank(&self, query: &str, documents: &[RetrievalDocument]) -> Result<Vec<(usize, f32)>>;

    /// Reranker name for logging
    fn name(&self) -> &str;
}
