//! Document ingestion stages: conversion, extraction, chunking, assembly

pub mod artifact;
mod assembler;
mod chunker;
mod converter;
pub mod fuzz;
mod pdf;
mod scan;
mod table_extractor;
mod text_extractor;

pub use assembler::{assemble, assemble_records};
pub use chunker::Chunker;
pub use converter::{convert_document, CommandConversionEngine, ConversionEngine, ConversionOutcome};
pub use pdf::{LayoutLine, LopdfInspector, Outline, PdfInspector};
pub use scan::{scan_pdfs, ScanResult};
pub use table_extractor::{TableExtraction, TableExtractor, NO_SUMMARY};
pub use text_extractor::{TextExtraction, TextExtractor, MATCH_THRESHOLD};
