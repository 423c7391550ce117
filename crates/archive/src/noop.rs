//! No-op sink: disables archival entirely.

use async_trait::async_trait;
use corvid_core::archive::{ArchiveBatch, ArchiveSink};
use corvid_core::error::ArchiveError;
use tracing::debug;

/// A sink that acknowledges every batch and stores nothing.
pub struct NoopSink;

#[async_trait]
impl ArchiveSink for NoopSink {
    fn name(&self) -> &str { "none" }

    async fn ingest(&self, batch: &ArchiveBatch) -> Result<(), ArchiveError> {
        debug!(batch_id = %batch.id, turns = batch.len(), "Archival disabled, dropping batch");
        Ok(())
    }
}
