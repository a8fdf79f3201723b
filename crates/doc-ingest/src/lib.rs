//! doc-ingest: PDF ingestion pipeline for retrieval-augmented generation
//!
//! Converts PDFs through an external layout engine, extracts header-aware text
//! and LLM-filtered tables, and packs sections into token-budgeted chunks. Every
//! stage writes a JSON artifact next to a content checksum, so unchanged files
//! are skipped on the next run.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use processing::{ingest_directory, Pipeline, PipelineContext};
pub use types::{Chunk, DocumentKind, IngestReport, RetrievalDocument, TableRecord, TextBlock};
