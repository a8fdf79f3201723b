//! PDF conversion through an external engine
//!
//! Each conversion is a separate OS process, so a crashing or leaking engine
//! takes down only the file it was working on.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;

use crate::config::ConversionConfig;
use crate::error::{Error, Result};
use crate::processing::SourceFile;
use crate::types::ConvertedDocument;

use super::artifact;

/// Trait for the engine turning a PDF into a structured document
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Convert one PDF
    async fn convert(&self, path: &Path) -> Result<ConvertedDocument>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// Runs a docling-style CLI: `<program> <args..> --to json --output <dir> <pdf>`
pub struct CommandConversionEngine {
    config: ConversionConfig,
}

impl CommandConversionEngine {
    pub fn new(config: ConversionConfig) -> Self {
        Self { config }
    }

    /// Check whether the converter executable can be started
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.program)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ConversionEngine for CommandConversionEngine {
    async fn convert(&self, path: &Path) -> Result<ConvertedDocument> {
        let display = path.display().to_string();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| Error::conversion(&display, "no file stem"))?;

        let out_dir = tempfile::tempdir()?;

        let output = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("--to")
            .arg("json")
            .arg("--output")
            .arg(out_dir.path())
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::conversion(&display, format!("failed to run '{}': {}", self.config.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::conversion(
                &display,
                format!("{} exited with {}: {}", self.config.program, output.status, stderr.trim()),
            ));
        }

        let json_path = out_dir.path().join(format!("{}.json", stem));
        let raw = tokio::fs::read(&json_path).await.map_err(|e| {
            Error::conversion(&display, format!("missing output {}: {}", json_path.display(), e))
        })?;

        serde_json::from_slice(&raw)
            .map_err(|e| Error::conversion(&display, format!("invalid converter output: {}", e)))
    }

    fn name(&self) -> &str {
        &self.config.program
    }
}

/// A converted document available on disk
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub converted: PathBuf,
    /// Seconds spent converting, 0.0 when skipped
    pub seconds: f64,
}

/// Convert a file unless its artifact is current; `None` on failure
pub async fn convert_document(engine: &dyn ConversionEngine, file: &SourceFile) -> Option<ConversionOutcome> {
    let filename = file.filename();
    let converted = file.artifacts.converted.clone();

    tracing::info!("[{}] Processing", filename);

    if !file.flags.convert {
        tracing::debug!("[{}] Conversion cached, skipping", filename);
        return Some(ConversionOutcome { converted, seconds: 0.0 });
    }

    tracing::debug!("[{}] Converting with {}", filename, engine.name());
    let start = Instant::now();

    let result = match engine.convert(&file.path).await {
        Ok(doc) => artifact::store_json(converted.clone(), doc).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            let seconds = start.elapsed().as_secs_f64();
            tracing::debug!("[{}] Converted in {:.2}s", filename, seconds);
            Some(ConversionOutcome { converted, seconds })
        }
        Err(e) => {
            tracing::error!("[{}] Error converting: {}", filename, e);
            None
        }
    }
}
