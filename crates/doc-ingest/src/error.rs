//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversion engine failure for a single file
    #[error("Failed to convert '{path}': {message}")]
    Conversion { path: String, message: String },

    /// PDF inspection error (outline, page layout, page count)
    #[error("PDF error: {0}")]
    Pdf(String),

    /// LLM inference service error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tokenizer service error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Vector store error
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Whole-batch failure escaping the orchestrator
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a conversion error
    pub fn conversion(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a PDF inspection error
    pub fn pdf(message: impl Into<String>) -> Self {
        Self::Pdf(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a tokenizer error
    pub fn tokenizer(message: impl Into<String>) -> Self {
        Self::Tokenizer(message.into())
    }

    /// Create a vector store error
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    /// Create a pipeline error
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::Pdf(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
