//! Stage-pipelined batch orchestration
//!
//! Every file of a batch is submitted for conversion up front. Whichever stage
//! finishes next is reaped and the file's following stage is spawned right
//! away, so extraction of early files overlaps conversion of later ones.
//! Each stage has its own semaphore; heavy batches convert with fewer workers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::ingestion::{
    artifact, assemble, convert_document, Chunker, ConversionEngine, ConversionOutcome, PdfInspector,
    TableExtractor, TextExtractor,
};
use crate::providers::{LlmService, Tokenizer};
use crate::types::{ConvertedDocument, FileStats, RetrievalDocument, StageTimings, TableRecord};

use super::change_tracker::SourceFile;
use super::partition::{Weight, WorkloadPartitioner};

/// Services and settings shared by every stage
#[derive(Clone)]
pub struct PipelineContext {
    pub config: IngestConfig,
    pub engine: Arc<dyn ConversionEngine>,
    pub inspector: Arc<dyn PdfInspector>,
    pub llm: Arc<dyn LlmService>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

/// Result of a pipeline run
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Stats of every file that got through conversion
    pub stats: BTreeMap<PathBuf, FileStats>,
    /// Retrieval documents of the completed files
    pub documents: Vec<RetrievalDocument>,
    /// Files that completed every stage in this run
    pub completed: Vec<PathBuf>,
}

/// Page and table counts plus timings of the extraction stage
#[derive(Debug, Default)]
struct Extracted {
    page_count: usize,
    table_count: usize,
    timings: StageTimings,
}

/// The stage implementations, shared with spawned tasks
struct Stages {
    engine: Arc<dyn ConversionEngine>,
    text: TextExtractor,
    tables: TableExtractor,
    chunker: Chunker,
}

impl Stages {
    async fn convert(&self, file: &SourceFile) -> Option<ConversionOutcome> {
        convert_document(self.engine.as_ref(), file).await
    }

    /// Text and table extraction; the two run concurrently
    async fn extract(self: Arc<Self>, file: SourceFile, converted: PathBuf) -> Result<Extracted> {
        let filename = file.filename();
        let flags = file.flags;

        if flags.text_processed && flags.table_processed {
            tracing::debug!("[{}] Text & tables processed already", filename);
            let tables: BTreeMap<usize, TableRecord> = artifact::load_json(file.artifacts.tables.clone()).await?;
            return Ok(Extracted {
                page_count: file.page_count,
                table_count: tables.len(),
                timings: StageTimings::default(),
            });
        }

        tracing::debug!("[{}] Loading converted document", filename);
        let doc: Arc<ConvertedDocument> = Arc::new(
            artifact::load_json(converted).await?,
        );

        let text_task = {
            let stages = self.clone();
            let doc = doc.clone();
            let file = file.clone();
            async move {
                if flags.text_processed {
                    return Ok(None);
                }
                match tokio::task::spawn_blocking(move || stages.text.process_file(&doc, &file)).await {
                    Ok(result) => result.map(Some),
                    Err(e) => Err(join_error(e)),
                }
            }
        };

        let table_task = async {
            if flags.table_processed {
                let tables: BTreeMap<usize, TableRecord> = artifact::load_json(file.artifacts.tables.clone()).await?;
                return Ok::<_, Error>((tables.len(), None));
            }
            let (count, seconds) = self.tables.process_file(&doc, &file).await?;
            Ok((count, Some(seconds)))
        };

        let (text, tables) = tokio::join!(text_task, table_task);
        let text = text?;
        let (table_count, table_seconds) = tables?;

        Ok(Extracted {
            page_count: text.map(|(pages, _)| pages).unwrap_or(file.page_count),
            table_count,
            timings: StageTimings {
                process_text: text.map(|(_, seconds)| seconds),
                process_tables: table_seconds,
                ..Default::default()
            },
        })
    }
}

/// Runs the convert, extract and chunk stages over light and heavy batches
pub struct Pipeline {
    config: IngestConfig,
    partitioner: WorkloadPartitioner,
    stages: Arc<Stages>,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        let processing = &ctx.config.processing;

        let stages = Stages {
            engine: ctx.engine.clone(),
            text: TextExtractor::new(ctx.inspector.clone()),
            tables: TableExtractor::new(
                ctx.llm.clone(),
                ctx.config.prompts.clone(),
                processing.table_workers,
                processing.classify_batch_size,
            ),
            chunker: Chunker::new(ctx.tokenizer.clone(), ctx.config.chunking.clone()),
        };

        Self {
            partitioner: WorkloadPartitioner::new(processing.heavy_page_threshold, ctx.inspector.clone()),
            config: ctx.config,
            stages: Arc::new(stages),
        }
    }

    /// Process every file: light batch first, then heavy
    pub async fn run(&self, files: Vec<SourceFile>) -> Result<PipelineOutput> {
        let partition = self.partitioner.partition(files);
        let mut output = PipelineOutput::default();
        let mut completed = Vec::new();

        for (weight, batch) in [(Weight::Light, partition.light), (Weight::Heavy, partition.heavy)] {
            let (stats, done) = self.run_batch(weight, batch).await?;
            output.stats.extend(stats);
            completed.extend(done);
        }

        for file in &completed {
            let filename = file.filename();
            let (chunks, tables, name) = (file.artifacts.chunks.clone(), file.artifacts.tables.clone(), filename.clone());
            let docs = tokio::task::spawn_blocking(move || assemble(&chunks, &tables, &name))
                .await
                .map_err(join_error)?
                .map_err(|e| Error::pipeline(format!("assembling {}: {}", filename, e)))?;
            output.documents.extend(docs);
        }

        output.completed = completed.into_iter().map(|f| f.path).collect();
        Ok(output)
    }

    async fn run_batch(
        &self,
        weight: Weight,
        files: Vec<SourceFile>,
    ) -> Result<(BTreeMap<PathBuf, FileStats>, Vec<SourceFile>)> {
        let mut stats: BTreeMap<PathBuf, FileStats> = BTreeMap::new();
        let mut completed = Vec::new();

        if files.is_empty() {
            return Ok((stats, completed));
        }

        let n = files.len();
        let processing = &self.config.processing;
        let convert_workers = weight.convert_workers(processing, n).max(1);
        let stage_workers = weight.stage_workers(processing, n).max(1);

        tracing::info!(
            "Processing {} {} file(s): {} conversion workers, {} stage workers",
            n,
            weight,
            convert_workers,
            stage_workers
        );
        let batch_start = Instant::now();

        let convert_sem = Arc::new(Semaphore::new(convert_workers));
        let extract_sem = Arc::new(Semaphore::new(stage_workers));
        let chunk_sem = Arc::new(Semaphore::new(stage_workers));

        let mut converting: JoinSet<(SourceFile, Option<ConversionOutcome>)> = JoinSet::new();
        let mut extracting: JoinSet<(SourceFile, Option<Extracted>)> = JoinSet::new();
        let mut chunking: JoinSet<(SourceFile, Option<f64>)> = JoinSet::new();

        for file in files {
            let stages = self.stages.clone();
            let sem = convert_sem.clone();
            converting.spawn(async move {
                let outcome = match sem.acquire_owned().await {
                    Ok(_permit) => stages.convert(&file).await,
                    Err(e) => {
                        tracing::error!("[{}] Conversion pool closed: {}", file.filename(), e);
                        None
                    }
                };
                (file, outcome)
            });
        }

        loop {
            tokio::select! {
                Some(joined) = converting.join_next() => {
                    let Some((file, outcome)) = reap(joined, "conversion")? else { continue };
                    let Some(outcome) = outcome else { continue };

                    stats.entry(file.path.clone()).or_default().timings.conversion = Some(outcome.seconds);

                    let stages = self.stages.clone();
                    let sem = extract_sem.clone();
                    extracting.spawn(async move {
                        let _permit = match sem.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(e) => {
                                tracing::error!("[{}] Extraction pool closed: {}", file.filename(), e);
                                return (file, None);
                            }
                        };
                        let result = stages.extract(file.clone(), outcome.converted).await;
                        match result {
                            Ok(extracted) => (file, Some(extracted)),
                            Err(e) => {
                                tracing::error!(
                                    "[{}] Error processing converted document: {}",
                                    file.filename(),
                                    e
                                );
                                (file, None)
                            }
                        }
                    });
                }
                Some(joined) = extracting.join_next() => {
                    let Some((file, extracted)) = reap(joined, "extraction")? else { continue };
                    let Some(extracted) = extracted else { continue };

                    let entry = stats.entry(file.path.clone()).or_default();
                    entry.page_count = extracted.page_count;
                    entry.table_count = extracted.table_count;
                    entry.timings.process_text = extracted.timings.process_text;
                    entry.timings.process_tables = extracted.timings.process_tables;

                    let stages = self.stages.clone();
                    let sem = chunk_sem.clone();
                    chunking.spawn(async move {
                        let seconds = match sem.acquire_owned().await {
                            Ok(_permit) => stages.chunker.chunk_file(&file).await,
                            Err(e) => {
                                tracing::error!("[{}] Chunking pool closed: {}", file.filename(), e);
                                None
                            }
                        };
                        (file, seconds)
                    });
                }
                Some(joined) = chunking.join_next() => {
                    let Some((file, seconds)) = reap(joined, "chunking")? else { continue };
                    let Some(seconds) = seconds else { continue };

                    stats.entry(file.path.clone()).or_default().timings.chunking = Some(seconds);
                    tracing::info!("[{}] Completed", file.filename());
                    completed.push(file);
                }
                else => break,
            }
        }

        tracing::info!(
            "Finished {} batch: {}/{} file(s) completed in {:.2}s",
            weight,
            completed.len(),
            n,
            batch_start.elapsed().as_secs_f64()
        );

        Ok((stats, completed))
    }
}

/// Unwrap a finished task; a panic counts as that file failing, a cancelled
/// task is a pipeline failure
fn reap<T>(joined: std::result::Result<T, JoinError>, stage: &str) -> Result<Option<T>> {
    match joined {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_panic() => {
            tracing::error!("A {} task panicked: {}", stage, e);
            Ok(None)
        }
        Err(e) => Err(Error::pipeline(format!("{} task failed: {}", stage, e))),
    }
}

fn join_error(e: JoinError) -> Error {
    Error::internal(format!("blocking task failed: {}", e))
}
