//! Atomic JSON documents.
//!
//! Documents are written to a temp file in the destination directory and
//! renamed into place, so readers never observe a half-written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

/// Render a document the way every studysync JSON file is stored
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value).context("Failed to serialize document")?;
    json.push('\n');
    Ok(json)
}

/// Write `content` to `path` atomically, creating parent directories
pub async fn write_atomic(path: &Path, content: impl Into<Vec<u8>>) -> Result<()> {
    let content = content.into();
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        tmp.write_all(&content)
            .context("Failed to write temp file")?;
        tmp.flush().context("Failed to flush temp file")?;
        tmp.persist(&target)
            .with_context(|| format!("Failed to replace {}", target.display()))?;
        Ok(())
    })
    .await
    .context("Atomic write task panicked")?
}

/// Serialize and atomically write a JSON document
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, to_pretty_json(value)?).await
}

/// Load a JSON document; `Ok(None)` when the file does not exist
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}
