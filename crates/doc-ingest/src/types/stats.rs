//! Per-file statistics and the run report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::RetrievalDocument;

/// Seconds spent in each stage; `None` when the stage did not run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_text: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_tables: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunking: Option<f64>,
}

impl StageTimings {
    /// Sum of all recorded stage times
    pub fn total(&self) -> f64 {
        [self.conversion, self.process_text, self.process_tables, self.chunking]
            .iter()
            .flatten()
            .sum()
    }
}

/// Statistics for one file that reached at least the convert stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub page_count: usize,
    pub table_count: usize,
    pub timings: StageTimings,
}

/// Outcome of an ingestion run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Stats keyed by source path
    pub stats: BTreeMap<PathBuf, FileStats>,
    /// Retrieval documents produced for fully processed files
    pub documents: Vec<RetrievalDocument>,
    /// Files that need to be re-run
    pub unprocessed: Vec<PathBuf>,
    /// PDF files found, including ones rejected by the magic-byte check
    pub total_pdfs: usize,
    /// Wall clock time of the run
    pub elapsed: Duration,
}

impl IngestReport {
    /// Number of files that completed
    pub fn ingested(&self) -> usize {
        self.stats.len().saturating_sub(
            self.unprocessed
                .iter()
                .filter(|p| self.stats.contains_key(*p))
                .count(),
        )
    }

    /// Share of discovered PDFs that completed, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_pdfs == 0 {
            0.0
        } else {
            self.ingested() as f64 / self.total_pdfs as f64 * 100.0
        }
    }

    /// Total pages over all files
    pub fn total_pages(&self) -> usize {
        self.stats.values().map(|s| s.page_count).sum()
    }

    /// Total kept tables over all files
    pub fn total_tables(&self) -> usize {
        self.stats.values().map(|s| s.table_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timings_total_ignores_missing_stages() {
        let timings = StageTimings {
            conversion: Some(1.5),
            chunking: Some(0.5),
            ..Default::default()
        };
        assert!((timings.total() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_rates() {
        let mut report = IngestReport {
            total_pdfs: 4,
            ..Default::default()
        };
        report.stats.insert(PathBuf::from("a.pdf"), FileStats::default());
        report.stats.insert(PathBuf::from("b.pdf"), FileStats::default());
        report.unprocessed = vec![PathBuf::from("b.pdf"), PathBuf::from("c.pdf")];

        assert_eq!(report.ingested(), 1);
        assert!((report.success_rate() - 25.0).abs() < f64::EPSILON);
    }
}
