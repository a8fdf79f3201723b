//! Chat prompt construction with token-budgeted context

use crate::config::ChatConfig;
use crate::error::Result;
use crate::providers::Tokenizer;
use crate::types::RetrievalDocument;

/// Prompt template with `{context}` and `{question}` placeholders
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Fill in both placeholders
    pub fn render(&self, context: &str, question: &str) -> String {
        self.template
            .replace("{context}", context)
            .replace("{question}", question)
    }
}

/// Join retrieved documents into one context string
pub fn build_context(documents: &[RetrievalDocument]) -> String {
    documents
        .iter()
        .map(|doc| doc.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut `context` so that template, question and context fit
/// `max_input_length` tokens
pub async fn truncate_context(
    tokenizer: &dyn Tokenizer,
    context: &str,
    question: &str,
    config: &ChatConfig,
) -> Result<String> {
    let question_tokens = tokenizer.count_tokens(question).await?;
    let remaining = config
        .max_input_length
        .saturating_sub(config.template_tokens + question_tokens);

    let tokens = tokenizer.tokenize(context).await?;
    if tokens.len() <= remaining {
        return Ok(context.to_string());
    }

    tracing::debug!(
        "Truncating context from {} to {} tokens",
        tokens.len(),
        remaining
    );
    tokenizer.detokenize(&tokens[..remaining]).await
}
