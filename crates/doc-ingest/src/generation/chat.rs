//! Streaming answers over retrieved documents

use futures::stream::BoxStream;

use crate::config::{ChatConfig, PromptConfig};
use crate::error::Result;
use crate::providers::{ChatRequest, LlmService, Tokenizer};
use crate::types::RetrievalDocument;

use super::prompt::{build_context, truncate_context, PromptTemplate};

/// Build the chat prompt and stream the completion as SSE lines
pub async fn stream_answer(
    llm: &dyn LlmService,
    tokenizer: &dyn Tokenizer,
    prompts: &PromptConfig,
    config: &ChatConfig,
    question: &str,
    documents: &[RetrievalDocument],
) -> Result<BoxStream<'static, Result<String>>> {
    let context = build_context(documents);
    let context = truncate_context(tokenizer, &context, question, config).await?;
    let prompt = PromptTemplate::new(prompts.query_vllm_stream.clone()).render(&context, question);

    tracing::debug!("Streaming answer from {} ({} chars of prompt)", llm.name(), prompt.len());

    llm.chat_stream(ChatRequest {
        prompt,
        max_new_tokens: config.max_new_tokens,
        temperature: config.temperature,
        stop: config.stop_words.clone(),
    })
    .await
}
