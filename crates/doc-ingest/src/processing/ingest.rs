//! Directory ingestion: scan, run the pipeline, load the vector store

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::ingestion::scan_pdfs;
use crate::providers::VectorStore;
use crate::types::IngestReport;

use super::change_tracker::ChangeTracker;
use super::pipeline::{Pipeline, PipelineContext};

/// Ingest every PDF under `dir` into the cache (and the store, when given)
pub async fn ingest_directory(
    dir: &Path,
    ctx: PipelineContext,
    store: Option<Arc<dyn VectorStore>>,
) -> Result<IngestReport> {
    tracing::info!("Ingestion started from dir '{}'", dir.display());
    let start = Instant::now();

    let scan = scan_pdfs(dir)?;
    let mut report = IngestReport {
        total_pdfs: scan.total_pdfs(),
        ..Default::default()
    };

    if scan.files.is_empty() {
        tracing::info!("No documents found to process in '{}'", dir.display());
        report.elapsed = start.elapsed();
        return Ok(report);
    }

    tracing::info!("Processing {} document(s)", scan.files.len());

    let tracker = ChangeTracker::new(ctx.config.cache.dir())?;
    let files = tracker.assess_all(dir, &scan.files);

    let output = match Pipeline::new(ctx).run(files).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Ingestion failed, please re-run the ingestion: {}", e);
            return Err(e);
        }
    };

    if !output.documents.is_empty() {
        if let Some(store) = &store {
            tracing::info!("Loading {} processed documents into {}", output.documents.len(), store.name());
            store.insert(&output.documents).await?;
            tracing::info!("Processed documents loaded into {}", store.name());
        }
    }

    let completed: HashSet<&PathBuf> = output.completed.iter().collect();
    let unprocessed: Vec<PathBuf> = scan
        .files
        .iter()
        .filter(|path| !completed.contains(path))
        .cloned()
        .collect();

    report.elapsed = start.elapsed();

    if unprocessed.is_empty() {
        tracing::info!(
            "Ingestion completed successfully, time taken: {:.2} seconds",
            report.elapsed.as_secs_f64()
        );
    } else {
        let list = unprocessed
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        tracing::warn!(
            "Ingestion completed partially, please re-run the ingestion to ingest the following files:\n{}",
            list
        );
    }

    report.stats = output.stats;
    report.documents = output.documents;
    report.unprocessed = unprocessed;

    tracing::info!(
        "Ingestion summary: {}/{} files ingested ({:.2}% of total PDF files)",
        report.ingested(),
        report.total_pdfs,
        report.success_rate()
    );

    Ok(report)
}
