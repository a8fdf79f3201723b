//! vLLM client for completions, chat streaming and tokenization
//!
//! All clients share one process-wide connection pool and one process-wide
//! cap on in-flight requests, both sized to the inference service's batching
//! capacity. A request waits for a free slot rather than opening a new
//! connection.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures_util::StreamExt;
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;

use crate::config::{LlmConfig, TokenizerConfig};
use crate::error::{Error, Result};

use super::llm::{ChatRequest, LlmService};
use super::tokenizer::Tokenizer;

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();
static REQUEST_SLOTS: OnceCell<Arc<Semaphore>> = OnceCell::new();

/// Process-wide HTTP client, built on first use and never recreated
pub fn shared_http_client(config: &LlmConfig) -> Result<Client> {
    let client = HTTP_CLIENT.get_or_try_init(|| {
        tracing::debug!(
            "Creating shared HTTP client (pool size {}, timeout {}s)",
            config.pool_size,
            config.timeout_secs
        );
        Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.pool_size)
            .build()
    })?;
    Ok(client.clone())
}

/// Process-wide limit on concurrent requests, `pool_size` permits
pub fn shared_request_slots(config: &LlmConfig) -> Arc<Semaphore> {
    REQUEST_SLOTS
        .get_or_init(|| Arc::new(Semaphore::new(config.pool_size.max(1))))
        .clone()
}

/// OpenAI-compatible vLLM client
pub struct VllmClient {
    client: Client,
    slots: Arc<Semaphore>,
    llm: LlmConfig,
    tokenizer: TokenizerConfig,
}

#[derive(Serialize)]
struct CompletionRequest<'a, P: Serialize> {
    model: &'a str,
    prompt: P,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    model: &'a str,
    max_tokens: u32,
    repetition_penalty: f32,
    temperature: f32,
    stop: &'a [String],
    stream: bool,
}

#[derive(Serialize)]
struct TokenizeRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct TokenizeResponse {
    #[serde(default)]
    tokens: Vec<u32>,
}

#[derive(Serialize)]
struct DetokenizeRequest<'a> {
    tokens: &'a [u32],
}

#[derive(Deserialize)]
struct DetokenizeResponse {
    #[serde(default)]
    prompt: String,
}

impl VllmClient {
    /// Create a client on top of the shared connection pool
    pub fn new(llm: &LlmConfig, tokenizer: &TokenizerConfig) -> Result<Self> {
        Ok(Self::with_parts(
            shared_http_client(llm)?,
            shared_request_slots(llm),
            llm,
            tokenizer,
        ))
    }

    fn with_parts(client: Client, slots: Arc<Semaphore>, llm: &LlmConfig, tokenizer: &TokenizerConfig) -> Self {
        Self {
            client,
            slots,
            llm: llm.clone(),
            tokenizer: tokenizer.clone(),
        }
    }

    /// Wait for a free request slot
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::internal(format!("Request slots closed: {}", e)))
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = self.tokenizer.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        let delay = Duration::from_millis(250 * 2u64.pow(attempt));
                        tracing::warn!(
                            "Tokenizer request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::tokenizer("Unknown error")))
    }

    async fn post_completion<P: Serialize + Sync>(
        &self,
        request: &CompletionRequest<'_, P>,
    ) -> Result<CompletionResponse> {
        let url = format!("{}/v1/completions", self.llm.endpoint);
        let _slot = self.acquire_slot().await?;

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::llm(format!("Completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::llm(format!("Completion failed: HTTP {} - {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::llm(format!("Failed to parse completion response: {}", e)))
    }
}

#[async_trait]
impl LlmService for VllmClient {
    async fn classify(&self, prompts: &[String]) -> Result<Vec<bool>> {
        let request = CompletionRequest {
            model: &self.llm.model,
            prompt: prompts,
            temperature: 0.0,
            max_tokens: self.llm.classify_max_tokens,
            repetition_penalty: None,
            stream: false,
        };

        let mut choices = self.post_completion(&request).await?.choices;
        choices.sort_by_key(|c| c.index);

        Ok(choices
            .iter()
            .map(|c| c.text.trim().to_lowercase().contains("yes"))
            .collect())
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.llm.model,
            prompt,
            temperature: 0.0,
            max_tokens: self.llm.summary_max_tokens,
            repetition_penalty: Some(1.1),
            stream: false,
        };

        let response = self.post_completion(&request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.text.trim().to_string())
            .ok_or_else(|| Error::llm("Completion response contained no choices"))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
        let url = format!("{}/v1/chat/completions", self.llm.endpoint);
        let body = ChatCompletionRequest {
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            model: &self.llm.model,
            max_tokens: request.max_new_tokens,
            repetition_penalty: 1.1,
            temperature: request.temperature,
            stop: &request.stop,
            stream: true,
        };

        let slot = self.acquire_slot().await?;
        let response = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::llm(format!("Stream request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::llm(format!("Stream failed: HTTP {} - {}", status, body)));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::llm(format!("Stream error: {}", e))));

        // The slot stays taken until the stream is dropped
        Ok(sse_lines(chunks)
            .map(move |line| {
                let _held = &slot;
                line
            })
            .boxed())
    }

    fn name(&self) -> &str {
        "vllm"
    }
}

#[async_trait]
impl Tokenizer for VllmClient {
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let url = format!("{}/tokenize", self.tokenizer.endpoint);

        self.retry_request(|| async {
            let _slot = self.acquire_slot().await?;
            let response = self
                .client
                .post(&url)
                .json(&TokenizeRequest { prompt: text })
                .send()
                .await
                .map_err(|e| Error::tokenizer(format!("Tokenize request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::tokenizer(format!("Tokenize failed: HTTP {} - {}", status, body)));
            }

            let parsed: TokenizeResponse = response
                .json()
                .await
                .map_err(|e| Error::tokenizer(format!("Failed to parse tokenize response: {}", e)))?;
            Ok(parsed.tokens)
        })
        .await
    }

    async fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        let url = format!("{}/detokenize", self.tokenizer.endpoint);

        self.retry_request(|| async {
            let _slot = self.acquire_slot().await?;
            let response = self
                .client
                .post(&url)
                .json(&DetokenizeRequest { tokens })
                .send()
                .await
                .map_err(|e| Error::tokenizer(format!("Detokenize request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(Error::tokenizer(format!("Detokenize failed: HTTP {}", status)));
            }

            let parsed: DetokenizeResponse = response
                .json()
                .await
                .map_err(|e| Error::tokenizer(format!("Failed to parse detokenize response: {}", e)))?;
            Ok(parsed.prompt)
        })
        .await
    }
}

/// Split a byte stream into non-empty lines, each terminated by a blank line
fn sse_lines<S>(chunks: S) -> impl futures::Stream<Item = Result<String>> + Send + 'static
where
    S: futures::Stream<Item = Result<bytes::Bytes>> + Send + 'static,
{
    chunks
        .scan(Vec::<u8>::new(), |buffer, chunk| {
            let lines: Vec<Result<String>> = match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    let mut lines = Vec::new();
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        let line = line.trim_end_matches(['\n', '\r']);
                        if !line.is_empty() {
                            lines.push(Ok(format!("{}\n\n", line)));
                        }
                    }
                    lines
                }
                Err(e) => vec![Err(e)],
            };
            futures::future::ready(Some(stream::iter(lines)))
        })
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve completions slowly on a local port, tracking the peak number of
    /// requests handled at once
    async fn slow_completion_server(peak: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let active = Arc::new(AtomicUsize::new(0));

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = socket.read(&mut buf).await.unwrap();
                        request.extend_from_slice(&buf[..n]);
                        let text = String::from_utf8_lossy(&request).to_string();
                        if let Some(end) = text.find("\r\n\r\n") {
                            let length = text[..end]
                                .lines()
                                .filter_map(|l| l.split_once(':'))
                                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if request.len() >= end + 4 + length {
                                break;
                            }
                        }
                        if n == 0 {
                            break;
                        }
                    }

                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);

                    let body = r#"{"choices":[{"index":0,"text":" ok "}]}"#;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_requests_capped_by_slots() {
        let peak = Arc::new(AtomicUsize::new(0));
        let llm = LlmConfig {
            endpoint: slow_completion_server(peak.clone()).await,
            pool_size: 2,
            ..Default::default()
        };
        let client = Arc::new(VllmClient::with_parts(
            Client::new(),
            Arc::new(Semaphore::new(llm.pool_size)),
            &llm,
            &TokenizerConfig::default(),
        ));

        let calls = (0..6).map(|_| {
            let client = client.clone();
            async move { client.complete("hello").await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.as_deref().ok() == Some("ok")));
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
        assert_eq!(client.slots.available_permits(), 2);
    }

    #[test]
    fn test_shared_slots_are_reused() {
        let config = LlmConfig::default();
        let first = shared_request_slots(&config);
        let second = shared_request_slots(&LlmConfig {
            pool_size: 1,
            ..Default::default()
        });
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_sse_lines_rejoins_split_chunks() {
        let chunks = stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"data: {\"a\"")),
            Ok(bytes::Bytes::from_static(b":1}\n\ndata: [DONE]\n")),
        ]);

        let lines: Vec<String> = sse_lines(chunks)
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(lines, vec!["data: {\"a\":1}\n\n", "data: [DONE]\n\n"]);
    }

    #[tokio::test]
    async fn test_sse_lines_forwards_errors() {
        let chunks = stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"data: x\n")),
            Err(Error::llm("reset")),
        ]);

        let lines: Vec<Result<String>> = sse_lines(chunks).collect().await;
        assert_eq!(lines.len(), 2);
        assert!(lines[1].is_err());
    }

    #[test]
    fn test_shared_client_is_reused() {
        let config = LlmConfig::default();
        assert!(shared_http_client(&config).is_ok());
        assert!(HTTP_CLIENT.get().is_some());
        assert!(shared_http_client(&config).is_ok());
    }
}
