//! Core types for the ingestion pipeline

pub mod chunk;
pub mod document;
pub mod stats;

pub use chunk::{Chunk, DocumentKind, RetrievalDocument, TableRecord, TextBlock};
pub use document::{
    BlockLabel, ConvertedDocument, PageItem, Provenance, RefItem, TableCell, TableData, TableItem,
    TextItem,
};
pub use stats::{FileStats, IngestReport, StageTimings};
