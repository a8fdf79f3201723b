//! Tokenizer service abstraction

use async_trait::async_trait;

use crate::error::Result;

/// Trait for the remote tokenizer backing token budgets
#[async_trait]
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids back into text
    async fn detokenize(&self, tokens: &[u32]) -> Result<String>;

    /// Number of tokens in `text`
    async fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.tokenize(text).await?.len())
    }
}
