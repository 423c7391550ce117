//! File-based sink: persistent JSON-lines storage of archive batches.
//!
//! Each line is one JSON-encoded [`ArchiveBatch`]. The file is append-only;
//! nothing already written is ever rewritten.
//!
//! Default location: `~/.corvid/archive.jsonl`

use async_trait::async_trait;
use corvid_core::archive::{ArchiveBatch, ArchiveSink};
use corvid_core::error::ArchiveError;
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A file-backed archive using JSONL (one batch per line).
pub struct JsonlFileSink {
    path: PathBuf,
    // Serializes appends so concurrent ingests never interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlFileSink {
    /// Create a sink writing to `path`. The file is created on first ingest.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every batch stored at `path`, oldest first.
    ///
    /// A missing file yields an empty list; corrupted lines are skipped.
    pub fn read_all(path: &Path) -> Result<Vec<ArchiveBatch>, ArchiveError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ArchiveError::Storage(format!(
                    "Failed to read archive {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ArchiveBatch>(line) {
                Ok(batch) => Some(batch),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted archive line");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl ArchiveSink for JsonlFileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn ingest(&self, batch: &ArchiveBatch) -> Result<(), ArchiveError> {
        let mut line = serde_json::to_string(batch)
            .map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ArchiveError::Storage(format!("Failed to create archive directory: {e}"))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ArchiveError::Storage(format!("Failed to open archive file: {e}")))?;

        // A fragment left by an interrupted append must not swallow this line.
        if !ends_with_newline(&mut file).await.map_err(|e| {
            ArchiveError::Storage(format!("Failed to read archive file: {e}"))
        })? {
            line.insert(0, '\n');
        }

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ArchiveError::Storage(format!("Failed to write archive file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| ArchiveError::Storage(format!("Failed to flush archive file: {e}")))?;

        debug!(path = %self.path.display(), batch_id = %batch.id, "Archive batch appended");
        Ok(())
    }
}

/// True for an empty file or one whose last byte is `\n`.
async fn ends_with_newline(file: &mut tokio::fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}
