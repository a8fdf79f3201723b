//! Table extraction with LLM keep/drop classification and summaries
//!
//! Classification fails open (a table is kept when the service cannot
//! answer); summarization fails closed per table with a placeholder.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::PromptConfig;
use crate::error::Result;
use crate::processing::SourceFile;
use crate::providers::{LlmService, Outcome};
use crate::types::{ConvertedDocument, TableRecord};

use super::artifact;

/// Summary stored when the LLM could not produce one
pub const NO_SUMMARY: &str = "No summary.";

/// Kept tables keyed by their index in the converted document
#[derive(Debug, Clone, Default)]
pub struct TableExtraction {
    pub tables: BTreeMap<usize, TableRecord>,
}

/// Renders, classifies and summarizes the tables of a document
pub struct TableExtractor {
    llm: Arc<dyn LlmService>,
    prompts: PromptConfig,
    workers: usize,
    classify_batch: usize,
}

impl TableExtractor {
    pub fn new(llm: Arc<dyn LlmService>, prompts: PromptConfig, workers: usize, classify_batch: usize) -> Self {
        Self {
            llm,
            prompts,
            workers: workers.max(1),
            classify_batch: classify_batch.max(1),
        }
    }

    /// Extract the tables worth keeping, each with a summary
    pub async fn extract(&self, doc: &ConvertedDocument, filename: &str) -> TableExtraction {
        if doc.tables.is_empty() {
            tracing::debug!("[{}] No tables found", filename);
            return TableExtraction::default();
        }

        let rendered: Vec<(String, String)> = doc
            .tables
            .iter()
            .map(|table| (table.to_html(doc), table.caption_text(doc)))
            .collect();

        let htmls: Vec<&str> = rendered.iter().map(|(html, _)| html.as_str()).collect();
        let decisions = self.classify(&htmls, filename).await;

        let kept: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, decision)| *decision.value())
            .map(|(idx, _)| idx)
            .collect();

        tracing::debug!(
            "[{}] Keeping {}/{} tables after classification",
            filename,
            kept.len(),
            rendered.len()
        );

        let kept_htmls: Vec<&str> = kept.iter().map(|idx| htmls[*idx]).collect();
        let summaries = self.summarize(&kept_htmls, filename).await;

        let tables = kept
            .into_iter()
            .zip(summaries)
            .map(|(idx, summary)| {
                let (html, caption) = rendered[idx].clone();
                (
                    idx,
                    TableRecord {
                        html,
                        caption,
                        summary: summary.into_value(),
                    },
                )
            })
            .collect();

        TableExtraction { tables }
    }

    /// Extract and persist the table artifact, returning table count and seconds
    pub async fn process_file(&self, doc: &ConvertedDocument, file: &SourceFile) -> Result<(usize, f64)> {
        let start = Instant::now();
        let filename = file.filename();
        let extraction = self.extract(doc, &filename).await;
        let count = extraction.tables.len();
        artifact::store_json(file.artifacts.tables.clone(), extraction.tables).await?;

        let seconds = start.elapsed().as_secs_f64();
        tracing::debug!("[{}] Processed {} tables in {:.2}s", filename, count, seconds);
        Ok((count, seconds))
    }

    /// One decision per table, in input order
    async fn classify(&self, htmls: &[&str], filename: &str) -> Vec<Outcome<bool>> {
        let prompts: Vec<String> = htmls
            .iter()
            .map(|html| self.prompts.llm_classify.replace("{text}", html.trim()))
            .collect();

        let batches: Vec<Vec<String>> = prompts
            .chunks(self.classify_batch)
            .map(|batch| batch.to_vec())
            .collect();
        let concurrency = self.workers.min(batches.len()).max(1);

        let mut results: Vec<(usize, Vec<Outcome<bool>>)> = stream::iter(batches.into_iter().enumerate())
            .map(|(batch_idx, batch)| {
                let llm = self.llm.clone();
                let filename = filename.to_string();
                async move {
                    let outcomes = classify_batch(llm.as_ref(), &batch, &filename).await;
                    (batch_idx, outcomes)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|(batch_idx, _)| *batch_idx);
        results.into_iter().flat_map(|(_, outcomes)| outcomes).collect()
    }

    /// One summary per table, in input order
    async fn summarize(&self, htmls: &[&str], filename: &str) -> Vec<Outcome<String>> {
        if htmls.is_empty() {
            return Vec::new();
        }

        let concurrency = self.workers.min(htmls.len());
        let prompts: Vec<String> = htmls
            .iter()
            .map(|html| self.prompts.table_summary.replace("{content}", html))
            .collect();

        let mut results: Vec<(usize, Outcome<String>)> = stream::iter(prompts.into_iter().enumerate())
            .map(|(idx, prompt)| {
                let llm = self.llm.clone();
                let filename = filename.to_string();
                async move {
                    let outcome = Outcome::or_fallback(llm.complete(&prompt).await, NO_SUMMARY.to_string());
                    if let Outcome::Fallback { reason, .. } = &outcome {
                        tracing::warn!("[{}] Error summarizing table {}: {}", filename, idx, reason);
                    }
                    (idx, outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Classify one batch; errors and missing choices keep the table
async fn classify_batch(llm: &dyn LlmService, batch: &[String], filename: &str) -> Vec<Outcome<bool>> {
    match llm.classify(batch).await {
        Ok(decisions) => {
            if decisions.len() < batch.len() {
                tracing::warn!(
                    "[{}] Classifier returned {} answers for {} tables, keeping the rest",
                    filename,
                    decisions.len(),
                    batch.len()
                );
            }
            (0..batch.len())
                .map(|i| match decisions.get(i) {
                    Some(keep) => Outcome::Success(*keep),
                    None => Outcome::Fallback {
                        value: true,
                        reason: "missing choice".to_string(),
                    },
                })
                .collect()
        }
        Err(e) => {
            tracing::warn!("[{}] Error while classifying tables: {}", filename, e);
            let reason = e.to_string();
            (0..batch.len())
                .map(|_| Outcome::Fallback {
                    value: true,
                    reason: reason.clone(),
                })
                .collect()
        }
    }
}
