//! End-to-end ingestion runs against in-process fakes of every remote service

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tempfile::TempDir;

use doc_ingest::error::{Error, Result};
use doc_ingest::ingestion::{ConversionEngine, LayoutLine, Outline, PdfInspector};
use doc_ingest::processing::{ingest_directory, PipelineContext};
use doc_ingest::providers::{ChatRequest, LlmService, SearchHit, SearchMode, Tokenizer, VectorStore};
use doc_ingest::retrieval::reset_store;
use doc_ingest::types::{
    BlockLabel, ConvertedDocument, PageItem, Provenance, RefItem, TableCell, TableData, TableItem,
    TextItem,
};
use doc_ingest::{DocumentKind, IngestConfig, IngestReport, RetrievalDocument};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeEngine {
    converted: Mutex<Vec<String>>,
    /// Artifact the "slow" file waits for before finishing its conversion
    slow_waits_for: Mutex<Option<PathBuf>>,
    slow_saw_artifact: AtomicBool,
}

impl FakeEngine {
    fn calls(&self) -> usize {
        self.converted.lock().len()
    }

    fn converted_stems(&self) -> Vec<String> {
        self.converted.lock().clone()
    }
}

#[async_trait]
impl ConversionEngine for FakeEngine {
    async fn convert(&self, path: &Path) -> Result<ConvertedDocument> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.converted.lock().push(stem.clone());

        if stem.contains("broken") {
            return Err(Error::conversion(path.display().to_string(), "unreadable xref table"));
        }
        if stem.contains("panics") {
            panic!("converter crashed on {}", stem);
        }
        if stem == "slow" {
            let watched = self.slow_waits_for.lock().clone();
            if let Some(watched) = watched {
                for _ in 0..200 {
                    if watched.exists() {
                        self.slow_saw_artifact.store(true, Ordering::SeqCst);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        }
        let body = std::fs::read_to_string(path).map_err(Error::Io)?;
        Ok(manual(&stem, &body))
    }

    fn name(&self) -> &str {
        "fake-engine"
    }
}

fn text(label: BlockLabel, text: &str, page: u32) -> TextItem {
    TextItem {
        label,
        text: text.to_string(),
        prov: vec![Provenance { page_no: page }],
    }
}

fn cell(text: &str, row: usize, col: usize, header: bool) -> TableCell {
    TableCell {
        text: text.to_string(),
        start_row_offset_idx: row,
        end_row_offset_idx: row + 1,
        start_col_offset_idx: col,
        end_col_offset_idx: col + 1,
        column_header: header,
        row_header: false,
    }
}

/// A two-page manual whose body text varies with the PDF contents
fn manual(stem: &str, body: &str) -> ConvertedDocument {
    let mut pages = BTreeMap::new();
    pages.insert("1".to_string(), PageItem { page_no: 1 });
    pages.insert("2".to_string(), PageItem { page_no: 2 });

    ConvertedDocument {
        name: stem.to_string(),
        texts: vec![
            text(BlockLabel::SectionHeader, "Introduction", 1),
            text(BlockLabel::Text, "The pump moves water through the plant. It runs daily.", 1),
            text(BlockLabel::Caption, "Table 1: Flow rates", 2),
            text(BlockLabel::SectionHeader, "Maintenance", 2),
            text(BlockLabel::Text, &format!("Clean the filter weekly. Revision {}.", body.len()), 2),
            text(BlockLabel::PageFooter, "Page 2", 2),
        ],
        tables: vec![TableItem {
            captions: vec![RefItem {
                cref: "#/texts/2".to_string(),
            }],
            prov: vec![Provenance { page_no: 2 }],
            data: TableData {
                table_cells: vec![
                    cell("Pump", 0, 0, true),
                    cell("Flow", 0, 1, true),
                    cell("P-1", 1, 0, false),
                    cell("40 l/s", 1, 1, false),
                ],
                num_rows: 2,
                num_cols: 2,
            },
        }],
        pages,
    }
}

struct FakeInspector;

/// Files named "atlas*" are large enough for the heavy batch
impl PdfInspector for FakeInspector {
    fn page_count(&self, path: &Path) -> Result<usize> {
        let atlas = path
            .file_stem()
            .map(|s| s.to_string_lossy().starts_with("atlas"))
            .unwrap_or(false);
        Ok(if atlas { 640 } else { 2 })
    }

    fn outline(&self, _path: &Path) -> Result<Option<Outline>> {
        Ok(Some(vec![
            ("Introduction".to_string(), 1),
            ("Maintenance".to_string(), 2),
        ]))
    }

    fn page_lines(&self, _path: &Path, _pages: &[u32]) -> Result<BTreeMap<u32, Vec<LayoutLine>>> {
        Ok(BTreeMap::new())
    }
}

#[derive(Default)]
struct FakeLlm {
    calls: AtomicUsize,
}

impl FakeLlm {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmService for FakeLlm {
    async fn classify(&self, prompts: &[String]) -> Result<Vec<bool>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![true; prompts.len()])
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Flow rate of each pump.".to_string())
    }

    async fn chat_stream(&self, _request: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
        Err(Error::llm("chat is not used during ingestion"))
    }

    fn name(&self) -> &str {
        "fake-llm"
    }
}

/// One token per whitespace separated word
#[derive(Default)]
struct WordTokenizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Tokenizer for WordTokenizer {
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.split_whitespace().map(|_| 1).collect())
    }

    async fn detokenize(&self, _tokens: &[u32]) -> Result<String> {
        Err(Error::tokenizer("not used"))
    }
}

#[derive(Default)]
struct MemoryStore {
    documents: Mutex<Vec<RetrievalDocument>>,
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn insert(&self, documents: &[RetrievalDocument]) -> Result<()> {
        self.documents.lock().extend_from_slice(documents);
        Ok(())
    }

    async fn search(&self, _query: &str, _mode: SearchMode, _top_k: usize) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    async fn reset(&self) -> Result<()> {
        self.documents.lock().clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    docs: TempDir,
    cache: TempDir,
    engine: Arc<FakeEngine>,
    llm: Arc<FakeLlm>,
    tokenizer: Arc<WordTokenizer>,
}

impl Harness {
    fn new() -> Self {
        Self {
            docs: tempfile::tempdir().unwrap(),
            cache: tempfile::tempdir().unwrap(),
            engine: Arc::new(FakeEngine::default()),
            llm: Arc::new(FakeLlm::default()),
            tokenizer: Arc::new(WordTokenizer::default()),
        }
    }

    fn write_pdf(&self, name: &str, body: &str) -> PathBuf {
        let path = self.docs.path().join(name);
        std::fs::write(&path, format!("%PDF-1.7\n{}", body)).unwrap();
        path
    }

    fn context(&self) -> PipelineContext {
        let mut config = IngestConfig::default();
        config.cache.root = self.cache.path().to_path_buf();
        config.cache.index_name = "manuals".to_string();
        config.processing.worker_size = 2;

        PipelineContext {
            config,
            engine: self.engine.clone(),
            inspector: Arc::new(FakeInspector),
            llm: self.llm.clone(),
            tokenizer: self.tokenizer.clone(),
        }
    }

    fn cache_dir(&self) -> PathBuf {
        self.cache.path().join("manuals")
    }

    async fn run(&self) -> IngestReport {
        ingest_directory(self.docs.path(), self.context(), None).await.unwrap()
    }

    /// Every artifact in the cache, keyed by file name
    fn artifacts(&self) -> BTreeMap<String, Vec<u8>> {
        std::fs::read_dir(self.cache_dir())
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                (
                    entry.file_name().to_string_lossy().to_string(),
                    std::fs::read(entry.path()).unwrap(),
                )
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_run_produces_documents() {
    let h = Harness::new();
    let pdf = h.write_pdf("pump.pdf", "pump manual");

    let report = h.run().await;

    assert_eq!(report.total_pdfs, 1);
    assert!(report.unprocessed.is_empty());
    assert_eq!(report.ingested(), 1);

    let stats = &report.stats[&pdf];
    assert_eq!(stats.page_count, 2);
    assert_eq!(stats.table_count, 1);
    assert!(stats.timings.conversion.is_some());
    assert!(stats.timings.chunking.is_some());

    let text_docs: Vec<&RetrievalDocument> = report
        .documents
        .iter()
        .filter(|d| d.kind == DocumentKind::Text)
        .collect();
    assert_eq!(text_docs.len(), 2);
    assert!(text_docs[0].page_content.starts_with("Chapter: Introduction"));
    assert!(text_docs[1].source.contains("Section: Maintenance"));
    assert!(text_docs.iter().all(|d| !d.page_content.contains("Page 2")));

    let table_docs: Vec<&RetrievalDocument> = report
        .documents
        .iter()
        .filter(|d| d.kind == DocumentKind::Table)
        .collect();
    assert_eq!(table_docs.len(), 1);
    assert_eq!(table_docs[0].page_content, "Flow rate of each pump.");
    assert!(table_docs[0].source.contains("<caption>Table 1: Flow rates</caption>"));
    assert!(report.documents.iter().all(|d| d.filename == "pump.pdf"));

    let artifacts = h.artifacts();
    for name in [
        "pump.checksum",
        "pump.json",
        "pump_clean_text.json",
        "pump_clean_tables.json",
        "pump_chunks.json",
    ] {
        assert!(artifacts.contains_key(name), "missing artifact {}", name);
    }
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = Harness::new();
    h.write_pdf("pump.pdf", "pump manual");
    h.write_pdf("valve.pdf", "valve manual, second edition");

    let first = h.run().await;
    let before = h.artifacts();
    let (conversions, llm_calls, token_calls) = (
        h.engine.calls(),
        h.llm.calls(),
        h.tokenizer.calls.load(Ordering::SeqCst),
    );
    assert_eq!(conversions, 2);
    assert!(llm_calls > 0);

    let second = h.run().await;

    assert_eq!(h.engine.calls(), conversions);
    assert_eq!(h.llm.calls(), llm_calls);
    assert_eq!(h.tokenizer.calls.load(Ordering::SeqCst), token_calls);
    assert_eq!(h.artifacts(), before);
    assert_eq!(second.documents, first.documents);
    assert!(second.unprocessed.is_empty());
}

#[tokio::test]
async fn test_changed_file_reprocessed_alone() {
    let h = Harness::new();
    let pump = h.write_pdf("pump.pdf", "pump manual");
    h.write_pdf("valve.pdf", "valve manual");
    h.run().await;
    let before = h.artifacts();

    std::fs::write(&pump, "%PDF-1.7\npump manual, revised with new torque values").unwrap();
    let report = h.run().await;

    assert_eq!(h.engine.converted_stems().iter().filter(|s| *s == "pump").count(), 2);
    assert_eq!(h.engine.converted_stems().iter().filter(|s| *s == "valve").count(), 1);

    let after = h.artifacts();
    assert_ne!(after["pump.checksum"], before["pump.checksum"]);
    assert_ne!(after["pump_chunks.json"], before["pump_chunks.json"]);
    for name in ["valve.checksum", "valve.json", "valve_clean_text.json", "valve_chunks.json"] {
        assert_eq!(after[name], before[name], "{} changed", name);
    }
    assert!(report.unprocessed.is_empty());
}

#[tokio::test]
async fn test_failed_file_does_not_stop_batch() {
    let h = Harness::new();
    let good = h.write_pdf("pump.pdf", "pump manual");
    let broken = h.write_pdf("broken.pdf", "truncated");

    let report = h.run().await;

    assert_eq!(report.total_pdfs, 2);
    assert_eq!(report.unprocessed, vec![broken.clone()]);
    assert!(report.stats.contains_key(&good));
    assert!(!report.stats.contains_key(&broken));
    assert!(report.documents.iter().all(|d| d.filename == "pump.pdf"));
    assert!((report.success_rate() - 50.0).abs() < f64::EPSILON);

    // Only the failed file is retried
    let retry = h.run().await;
    let stems = h.engine.converted_stems();
    assert_eq!(stems.iter().filter(|s| *s == "broken").count(), 2);
    assert_eq!(stems.iter().filter(|s| *s == "pump").count(), 1);
    assert_eq!(retry.unprocessed, vec![broken]);
}

#[tokio::test]
async fn test_rejected_pdf_counts_toward_total() {
    let h = Harness::new();
    h.write_pdf("pump.pdf", "pump manual");
    std::fs::write(h.docs.path().join("notes.pdf"), "plain text renamed to pdf").unwrap();

    let report = h.run().await;

    assert_eq!(report.total_pdfs, 2);
    assert!(report.unprocessed.is_empty());
    assert_eq!(report.ingested(), 1);
    assert_eq!(h.engine.calls(), 1);
}

#[tokio::test]
async fn test_documents_loaded_into_store() {
    let h = Harness::new();
    h.write_pdf("pump.pdf", "pump manual");
    let store = Arc::new(MemoryStore::default());

    let report = ingest_directory(h.docs.path(), h.context(), Some(store.clone()))
        .await
        .unwrap();

    assert!(!report.documents.is_empty());
    assert_eq!(*store.documents.lock(), report.documents);

    reset_store(store.as_ref()).await.unwrap();
    assert!(store.documents.lock().is_empty());
}

#[tokio::test]
async fn test_empty_directory() {
    let h = Harness::new();

    let report = h.run().await;

    assert_eq!(report.total_pdfs, 0);
    assert!(report.stats.is_empty());
    assert_eq!(h.engine.calls(), 0);
}

#[tokio::test]
async fn test_quick_file_chunked_while_slow_file_converts() {
    let h = Harness::new();
    h.write_pdf("quick.pdf", "quick start");
    h.write_pdf("slow.pdf", "slow to convert");
    *h.engine.slow_waits_for.lock() = Some(h.cache_dir().join("quick_chunks.json"));

    let report = h.run().await;

    assert!(h.engine.slow_saw_artifact.load(Ordering::SeqCst));
    assert!(report.unprocessed.is_empty());
    assert_eq!(report.ingested(), 2);
}

#[tokio::test]
async fn test_heavy_file_runs_in_second_batch() {
    let h = Harness::new();
    let atlas = h.write_pdf("atlas.pdf", "plant atlas");
    let pump = h.write_pdf("pump.pdf", "pump manual");

    let report = h.run().await;

    assert!(report.unprocessed.is_empty());
    assert!(report.stats.contains_key(&atlas));
    assert!(report.stats.contains_key(&pump));
    assert_eq!(h.engine.converted_stems(), vec!["pump", "atlas"]);
    assert!(report.documents.iter().any(|d| d.filename == "atlas.pdf"));
}

#[tokio::test]
async fn test_lost_table_artifact_resumes_tables_only() {
    let h = Harness::new();
    h.write_pdf("pump.pdf", "pump manual");
    let first = h.run().await;
    let before = h.artifacts();
    let (llm_calls, token_calls) = (h.llm.calls(), h.tokenizer.calls.load(Ordering::SeqCst));

    std::fs::remove_file(h.cache_dir().join("pump_clean_tables.json")).unwrap();
    let second = h.run().await;

    assert_eq!(h.engine.calls(), 1);
    assert!(h.llm.calls() > llm_calls);
    assert_eq!(h.tokenizer.calls.load(Ordering::SeqCst), token_calls);

    let after = h.artifacts();
    assert_eq!(after["pump_clean_text.json"], before["pump_clean_text.json"]);
    assert_eq!(after["pump_chunks.json"], before["pump_chunks.json"]);
    assert_eq!(after["pump_clean_tables.json"], before["pump_clean_tables.json"]);
    assert_eq!(second.documents, first.documents);
}

#[tokio::test]
async fn test_same_name_in_subdirectories_kept_apart() {
    let h = Harness::new();
    for (dir, body) in [("a", "first plant"), ("b", "second plant, other revision")] {
        std::fs::create_dir_all(h.docs.path().join(dir)).unwrap();
        std::fs::write(h.docs.path().join(dir).join("manual.pdf"), format!("%PDF-1.7\n{}", body)).unwrap();
    }

    let first = h.run().await;
    assert_eq!(first.ingested(), 2);
    assert!(first.unprocessed.is_empty());

    let chunk_artifacts = h
        .artifacts()
        .keys()
        .filter(|name| name.ends_with("_chunks.json"))
        .count();
    assert_eq!(chunk_artifacts, 2);

    let second = h.run().await;
    assert_eq!(h.engine.calls(), 2);
    assert!(second.unprocessed.is_empty());
    assert_eq!(second.documents.len(), first.documents.len());
}

#[tokio::test]
async fn test_panicking_conversion_fails_only_that_file() {
    let h = Harness::new();
    let pump = h.write_pdf("pump.pdf", "pump manual");
    let crashing = h.write_pdf("panics.pdf", "malformed");

    let report = h.run().await;

    assert_eq!(report.unprocessed, vec![crashing]);
    assert!(report.stats.contains_key(&pump));
    assert!(report.documents.iter().all(|d| d.filename == "pump.pdf"));
}
