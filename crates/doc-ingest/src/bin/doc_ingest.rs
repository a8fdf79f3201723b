//! PDF ingestion CLI
//!
//! Run with: cargo run -p doc-ingest -- ingest --path /var/docs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_ingest::ingestion::{artifact, CommandConversionEngine, LopdfInspector};
use doc_ingest::processing::{ingest_directory, PipelineContext};
use doc_ingest::providers::VllmClient;
use doc_ingest::{IngestConfig, IngestReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "doc-ingest")]
#[command(about = "Convert, extract and chunk PDF documents for retrieval")]
struct Cli {
    /// Configuration file (defaults to $DOC_INGEST_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging and per-stage timings
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every PDF under a directory
    Ingest {
        #[arg(long, default_value = "/var/docs")]
        path: PathBuf,
    },

    /// Remove the artifact cache of the configured index
    CleanCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let debug = cli.debug
        || std::env::var("LOG_LEVEL")
            .map(|level| level.to_lowercase().contains("debug"))
            .unwrap_or(false);
    let default_filter = if debug { "doc_ingest=debug" } else { "doc_ingest=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => IngestConfig::from_file(path)?,
        None => IngestConfig::load()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Ingest { path } => ingest(config, &path, debug).await,
        Commands::CleanCache => clean_cache(&config.cache.dir()),
    }
}

async fn ingest(config: IngestConfig, path: &Path, debug: bool) -> Result<()> {
    tracing::info!("Configuration loaded");
    tracing::info!("  - Cache dir: {}", config.cache.dir().display());
    tracing::info!("  - LLM: {} at {}", config.llm.model, config.llm.endpoint);
    tracing::info!("  - Tokenizer: {}", config.tokenizer.endpoint);
    tracing::info!("  - Chunk budget: {} tokens", config.chunking.token_budget());

    let engine = CommandConversionEngine::new(config.conversion.clone());
    if !engine.is_available().await {
        tracing::warn!(
            "Conversion engine '{}' not found, conversions will fail",
            config.conversion.program
        );
    }

    let client = Arc::new(VllmClient::new(&config.llm, &config.tokenizer)?);
    let cache_dir = config.cache.dir();

    let ctx = PipelineContext {
        config,
        engine: Arc::new(engine),
        inspector: Arc::new(LopdfInspector::new()),
        llm: client.clone(),
        tokenizer: client,
    };

    let report = ingest_directory(path, ctx, None)
        .await
        .with_context(|| format!("Ingestion of '{}' failed", path.display()))?;

    if !report.documents.is_empty() {
        let output = cache_dir.join("documents.json");
        artifact::write_json(&output, &report.documents)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        tracing::info!("Wrote {} documents to {}", report.documents.len(), output.display());
    }

    print_stats(&report, debug);
    Ok(())
}

fn clean_cache(dir: &Path) -> Result<()> {
    if !dir.exists() {
        tracing::info!("Cache dir '{}' does not exist", dir.display());
        return Ok(());
    }
    std::fs::remove_dir_all(dir)
        .with_context(|| format!("Failed to remove cache dir '{}'", dir.display()))?;
    tracing::info!("Removed cache dir '{}'", dir.display());
    Ok(())
}

fn print_stats(report: &IngestReport, debug: bool) {
    if report.total_pages() == 0 {
        return;
    }

    let seconds = |value: Option<f64>| {
        value
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string())
    };

    if debug {
        println!(
            "\n{:<40} {:>7} {:>7} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "File", "Pages", "Tables", "Convert", "Text", "Tables(s)", "Chunking", "Total"
        );
    } else {
        println!("\n{:<40} {:>7} {:>7}", "File", "Pages", "Tables");
    }

    for (path, stats) in &report.stats {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        if debug {
            let t = &stats.timings;
            println!(
                "{:<40} {:>7} {:>7} {:>10} {:>10} {:>10} {:>10} {:>10.2}",
                name,
                stats.page_count,
                stats.table_count,
                seconds(t.conversion),
                seconds(t.process_text),
                seconds(t.process_tables),
                seconds(t.chunking),
                t.total()
            );
        } else {
            println!("{:<40} {:>7} {:>7}", name, stats.page_count, stats.table_count);
        }
    }

    println!(
        "\nTotal: {} pages, {} tables, {}/{} files in {:.2}s",
        report.total_pages(),
        report.total_tables(),
        report.ingested(),
        report.total_pdfs,
        report.elapsed.as_secs_f64()
    );
}
