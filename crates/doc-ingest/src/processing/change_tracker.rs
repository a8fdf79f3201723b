//! Checksum-gated change detection over the artifact cache
//!
//! A file's SHA-256 decides whether conversion can be skipped. Downstream
//! stages are skipped independently when their artifact is present and the
//! checksum is unchanged.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Suffix of the extracted text artifact
pub const TEXT_SUFFIX: &str = "_clean_text.json";
/// Suffix of the extracted table artifact
pub const TABLE_SUFFIX: &str = "_clean_tables.json";
/// Suffix of the chunk artifact
pub const CHUNK_SUFFIX: &str = "_chunks.json";

/// Which stages a file has already completed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageFlags {
    /// Conversion must run
    pub convert: bool,
    pub text_processed: bool,
    pub table_processed: bool,
    pub chunked: bool,
}

impl StageFlags {
    /// Flags for a file that has to go through every stage
    pub fn fresh() -> Self {
        Self {
            convert: true,
            ..Default::default()
        }
    }
}

/// Artifact locations for one artifact key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub checksum: PathBuf,
    pub converted: PathBuf,
    pub text: PathBuf,
    pub tables: PathBuf,
    pub chunks: PathBuf,
}

impl ArtifactPaths {
    /// Name every artifact of `key` inside `cache_dir`
    pub fn for_key(cache_dir: &Path, key: &str) -> Self {
        Self {
            checksum: cache_dir.join(format!("{}.checksum", key)),
            converted: cache_dir.join(format!("{}.json", key)),
            text: cache_dir.join(format!("{}{}", key, TEXT_SUFFIX)),
            tables: cache_dir.join(format!("{}{}", key, TABLE_SUFFIX)),
            chunks: cache_dir.join(format!("{}{}", key, CHUNK_SUFFIX)),
        }
    }

    /// Artifacts derived from the source file (everything but the checksum)
    pub fn derived(&self) -> [&Path; 4] {
        [&self.converted, &self.text, &self.tables, &self.chunks]
    }
}

/// A discovered PDF with its pipeline state
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Artifact name prefix, unique within the scanned directory
    pub key: String,
    pub checksum: String,
    /// Filled in by the partitioner
    pub page_count: usize,
    pub flags: StageFlags,
    pub artifacts: ArtifactPaths,
}

impl SourceFile {
    /// File name for logging and retrieval documents
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.key.clone())
    }
}

/// Decides which stages each file still needs
pub struct ChangeTracker {
    cache_dir: PathBuf,
}

impl ChangeTracker {
    /// Create a tracker over `cache_dir`, creating it when missing
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Compute the file's state; persists the new checksum and clears stale
    /// artifacts when conversion is required
    pub fn assess(&self, root: &Path, path: &Path) -> Result<SourceFile> {
        let key = artifact_key(root, path)?;
        let artifacts = ArtifactPaths::for_key(&self.cache_dir, &key);
        let checksum = file_checksum(path)?;

        let stored = std::fs::read_to_string(&artifacts.checksum)
            .ok()
            .map(|s| s.trim().to_string());

        let flags = match stored {
            Some(stored) if stored == checksum => StageFlags {
                convert: !artifacts.converted.exists(),
                text_processed: artifacts.text.exists(),
                table_processed: artifacts.tables.exists(),
                chunked: artifacts.chunks.exists(),
            },
            Some(_) => {
                tracing::info!("[{}] Checksum changed, invalidating cached artifacts", key);
                StageFlags::fresh()
            }
            None => StageFlags::fresh(),
        };

        if flags.convert {
            self.invalidate(&artifacts)?;
            std::fs::write(&artifacts.checksum, &checksum)?;
        }

        tracing::debug!("[{}] Stage flags: {:?}", key, flags);

        Ok(SourceFile {
            path: path.to_path_buf(),
            key,
            checksum,
            page_count: 0,
            flags,
            artifacts,
        })
    }

    /// Assess the files found under `root`, dropping (and logging) the ones
    /// that cannot be read
    pub fn assess_all(&self, root: &Path, paths: &[PathBuf]) -> Vec<SourceFile> {
        paths
            .iter()
            .filter_map(|path| match self.assess(root, path) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::error!("Failed to checksum {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    fn invalidate(&self, artifacts: &ArtifactPaths) -> Result<()> {
        for path in artifacts.derived() {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("Removed stale artifact {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Artifact name prefix for `path` found under `root`
///
/// `root/name.pdf` keeps its plain stem. Anything else (nested files, other
/// extension spellings) gets the stem plus a short hash of the relative path,
/// so same-named files in different folders never share artifacts.
pub fn artifact_key(root: &Path, path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| Error::internal(format!("No file stem in {}", path.display())))?;

    let relative = path.strip_prefix(root).unwrap_or(path);
    if relative == Path::new(&format!("{}.pdf", stem)) {
        return Ok(stem);
    }

    let digest = Sha256::digest(relative.to_string_lossy().as_bytes());
    Ok(format!("{}-{}", stem, &hex::encode(digest)[..8]))
}

/// Streamed SHA-256 of a file, hex encoded
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
