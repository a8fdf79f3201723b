//! Input discovery: recursive `.pdf` scan with a magic-byte check

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

const PDF_MAGIC: &[u8] = b"%PDF";

/// PDF files found under a directory
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Files with a `.pdf` extension and a PDF header, sorted
    pub files: Vec<PathBuf>,
    /// Files with a `.pdf` extension but another format
    pub rejected: Vec<PathBuf>,
}

impl ScanResult {
    /// Every file carrying a `.pdf` extension
    pub fn total_pdfs(&self) -> usize {
        self.files.len() + self.rejected.len()
    }
}

/// Walk `dir` recursively and collect PDF files
pub fn scan_pdfs(dir: &Path) -> Result<ScanResult> {
    if !dir.is_dir() {
        return Err(Error::Config(format!("'{}' is not a directory", dir.display())));
    }

    let mut result = ScanResult::default();

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !has_pdf_extension(path) {
            continue;
        }

        if has_pdf_magic(path) {
            result.files.push(path.to_path_buf());
        } else {
            tracing::warn!(
                "Skipping file with .pdf extension but unsupported format: {}",
                path.display()
            );
            result.rejected.push(path.to_path_buf());
        }
    }

    result.files.sort();
    Ok(result)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn has_pdf_magic(path: &Path) -> bool {
    let mut header = [0u8; 4];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map(|_| header == PDF_MAGIC)
        .unwrap_or(false)
}
