//! Workload partitioning by document weight
//!
//! Heavy documents (many pages) convert with fewer workers so that the
//! conversion engine's memory use stays bounded; the I/O-bound stages after
//! it keep the full worker count.

use std::sync::Arc;

use crate::config::ProcessingConfig;
use crate::ingestion::PdfInspector;

use super::change_tracker::SourceFile;

/// Document weight class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    /// Below the page threshold
    Light,
    /// At or above the page threshold
    Heavy,
}

impl Weight {
    /// Classify by page count
    pub fn from_pages(page_count: usize, threshold: usize) -> Self {
        if page_count >= threshold {
            Weight::Heavy
        } else {
            Weight::Light
        }
    }

    /// Conversion workers for a batch of `n` files
    pub fn convert_workers(&self, config: &ProcessingConfig, n: usize) -> usize {
        match self {
            Weight::Light => config.worker_size.min(n),
            Weight::Heavy => config.heavy_convert_workers.min(n),
        }
    }

    /// Extraction and chunking workers for a batch of `n` files
    pub fn stage_workers(&self, config: &ProcessingConfig, n: usize) -> usize {
        config.worker_size.min(n)
    }
}

impl std::fmt::Display for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Weight::Light => write!(f, "light"),
            Weight::Heavy => write!(f, "heavy"),
        }
    }
}

/// Files split into weight classes, each in input order
#[derive(Debug, Default)]
pub struct Partition {
    pub light: Vec<SourceFile>,
    pub heavy: Vec<SourceFile>,
}

/// Splits files into light and heavy batches
pub struct WorkloadPartitioner {
    threshold: usize,
    inspector: Arc<dyn PdfInspector>,
}

impl WorkloadPartitioner {
    pub fn new(threshold: usize, inspector: Arc<dyn PdfInspector>) -> Self {
        Self { threshold, inspector }
    }

    /// Partition files; a page count that cannot be read counts as 0
    pub fn partition(&self, files: Vec<SourceFile>) -> Partition {
        let mut partition = Partition::default();

        for mut file in files {
            file.page_count = match self.inspector.page_count(&file.path) {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!("[{}] Could not read page count: {}", file.filename(), e);
                    0
                }
            };

            match Weight::from_pages(file.page_count, self.threshold) {
                Weight::Light => partition.light.push(file),
                Weight::Heavy => partition.heavy.push(file),
            }
        }

        tracing::debug!(
            "Light files: {}, Heavy files: {}",
            partition.light.len(),
            partition.heavy.len()
        );

        partition
    }
}
