//! Configuration for the ingestion pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable pointing at a TOML configuration file
pub const CONFIG_ENV: &str = "DOC_INGEST_CONFIG";

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    /// Artifact cache configuration
    pub cache: CacheConfig,
    /// Worker pool and partitioning configuration
    pub processing: ProcessingConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// LLM inference service configuration
    pub llm: LlmConfig,
    /// Tokenizer service configuration
    pub tokenizer: TokenizerConfig,
    /// External conversion engine configuration
    pub conversion: ConversionConfig,
    /// Prompt templates
    pub prompts: PromptConfig,
    /// Chat completion configuration
    pub chat: ChatConfig,
    /// Retrieval configuration
    pub retrieval: RetrievalConfig,
}

impl IngestConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config at {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `DOC_INGEST_CONFIG`, falling back to defaults
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if Path::new(&path).exists() => Self::from_file(path),
            Ok(path) => {
                tracing::warn!("{} points at missing file '{}', using defaults", CONFIG_ENV, path);
                Ok(Self::default())
            }
            Err(_) => Ok(Self::default()),
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.prompts.validate()?;

        if self.processing.worker_size == 0 || self.processing.heavy_convert_workers == 0 {
            return Err(Error::Config("worker counts must be greater than zero".to_string()));
        }
        if self.processing.table_workers == 0 || self.processing.classify_batch_size == 0 {
            return Err(Error::Config(
                "table_workers and classify_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.chunking.token_budget() == 0 {
            return Err(Error::Config(format!(
                "chunking.max_tokens ({}) must exceed chunking.reserved_tokens ({})",
                self.chunking.max_tokens, self.chunking.reserved_tokens
            )));
        }
        if self.llm.pool_size == 0 {
            return Err(Error::Config("llm.pool_size must be greater than zero".to_string()));
        }
        self.retrieval.validate()?;

        Ok(())
    }
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for per-index artifact caches
    pub root: PathBuf,
    /// Name of the target index; artifacts live in `root/index_name`
    pub index_name: String,
}

impl CacheConfig {
    /// Directory holding this index's artifacts
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.index_name)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("doc-ingest"),
            index_name: "default".to_string(),
        }
    }
}

/// Worker pool and partitioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Upper bound for conversion workers (light files) and stage workers
    pub worker_size: usize,
    /// Upper bound for conversion workers when converting heavy files
    pub heavy_convert_workers: usize,
    /// Files with at least this many pages are heavy
    pub heavy_page_threshold: usize,
    /// Concurrent LLM requests per file while processing tables
    pub table_workers: usize,
    /// Prompts per classification request
    pub classify_batch_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            worker_size: 4,
            heavy_convert_workers: 2,
            heavy_page_threshold: 500,
            table_workers: 32,
            classify_batch_size: 32,
        }
    }
}

/// Token-budgeted chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum sequence length of the embedding model
    pub max_tokens: usize,
    /// Tokens held back from `max_tokens` for the breadcrumb prefix
    pub reserved_tokens: usize,
    /// Carry the last sentence of a closed chunk into the next one
    pub sentence_overlap: bool,
}

impl ChunkingConfig {
    /// Effective per-chunk token budget
    pub fn token_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            reserved_tokens: 100,
            sentence_overlap: true,
        }
    }
}

/// LLM inference service (vLLM, OpenAI-compatible) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the inference service
    pub endpoint: String,
    /// Model name sent with each request
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Idle connections kept per host; matches the service's max batch size
    pub pool_size: usize,
    /// Completion budget for a table summary
    pub summary_max_tokens: u32,
    /// Completion budget for a keep/drop answer
    pub classify_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            model: "ibm-granite/granite-3.3-8b-instruct".to_string(),
            timeout_secs: 300,
            pool_size: 32,
            summary_max_tokens: 512,
            classify_max_tokens: 3,
        }
    }
}

/// Tokenizer service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Base URL of the embedding server exposing `/tokenize` and `/detokenize`
    pub endpoint: String,
    /// Retries for a failed tokenize call before the file's chunking fails
    pub max_retries: u32,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8001".to_string(),
            max_retries: 2,
        }
    }
}

/// External conversion engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Converter executable
    pub program: String,
    /// Extra arguments placed before the output options
    pub args: Vec<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            program: "docling".to_string(),
            args: vec!["--no-ocr".to_string()],
        }
    }
}

/// Prompt templates sent to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Keep/drop question for a table; `{text}` is replaced by the table HTML
    pub llm_classify: String,
    /// Summary request for a table; `{content}` is replaced by the table HTML
    pub table_summary: String,
    /// Chat prompt; `{context}` and `{question}` are replaced
    pub query_vllm_stream: String,
}

impl PromptConfig {
    fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("llm_classify", &self.llm_classify),
            ("table_summary", &self.table_summary),
            ("query_vllm_stream", &self.query_vllm_stream),
        ]
        .iter()
        .filter(|(_, prompt)| prompt.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "prompt templates missing or empty: {}",
                missing.join(", ")
            )))
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            llm_classify: "You are given a table extracted from a document.\n\
                {text}\n\
                Does this table contain meaningful data worth keeping for question answering? \
                Answer yes or no.\nAnswer:"
                .to_string(),
            table_summary: "Summarize the following table in a few sentences. \
                Mention what it describes and its key values.\n\
                {content}\nSummary:"
                .to_string(),
            query_vllm_stream: "Answer the question using only the context below.\n\n\
                Context:\n{context}\n\nQuestion: {question}\nAnswer:"
                .to_string(),
        }
    }
}

/// Chat completion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Token limit for the whole prompt
    pub max_input_length: usize,
    /// Tokens taken by the prompt template itself
    pub template_tokens: usize,
    /// Completion budget
    pub max_new_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Stop sequences
    pub stop_words: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_input_length: 6000,
            template_tokens: 250,
            max_new_tokens: 600,
            temperature: 0.0,
            stop_words: Vec::new(),
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates fetched from the hybrid search
    pub top_k: usize,
    /// Candidates kept after ranking
    pub top_r: usize,
    /// Minimum score a kept candidate needs, in (0, 1)
    pub score_threshold: f32,
    /// Rerank candidates when a reranker is available
    pub use_reranker: bool,
}

impl RetrievalConfig {
    fn validate(&self) -> Result<()> {
        if self.top_k == 0 || self.top_r == 0 {
            return Err(Error::Config("retrieval.top_k and retrieval.top_r must be greater than zero".to_string()));
        }
        if !(self.score_threshold > 0.0 && self.score_threshold < 1.0) {
            return Err(Error::Config(format!(
                "retrieval.score_threshold ({}) must lie strictly between 0 and 1",
                self.score_threshold
            )));
        }
        Ok(())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            top_r: 3,
            score_threshold: 0.4,
            use_reranker: true,
        }
    }
}
