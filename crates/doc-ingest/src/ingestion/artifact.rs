//! JSON artifact persistence shared by every stage

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Write `value` as pretty JSON via a temp file in the same directory, then
/// rename into place
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::internal(format!("No parent directory for {}", path.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Read a JSON artifact
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// `write_json` on the blocking pool
pub async fn store_json<T: Serialize + Send + 'static>(path: PathBuf, value: T) -> Result<()> {
    tokio::task::spawn_blocking(move || write_json(&path, &value))
        .await
        .map_err(|e| Error::internal(format!("artifact write task failed: {}", e)))?
}

/// `read_json` on the blocking pool
pub async fn load_json<T: DeserializeOwned + Send + 'static>(path: PathBuf) -> Result<T> {
    tokio::task::spawn_blocking(move || read_json(&path))
        .await
        .map_err(|e| Error::internal(format!("artifact read task failed: {}", e)))?
}
