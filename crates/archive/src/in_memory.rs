//! In-memory sink: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use corvid_core::archive::{ArchiveBatch, ArchiveSink};
use corvid_core::error::ArchiveError;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A sink that keeps batches in a Vec, in ingestion order.
#[derive(Clone)]
pub struct InMemorySink {
    batches: Arc<RwLock<Vec<ArchiveBatch>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of every batch ingested so far.
    pub async fn batches(&self) -> Vec<ArchiveBatch> {
        self.batches.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.batches.read().await.len()
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveSink for InMemorySink {
    fn name(&self) -> &str { "memory" }

    async fn ingest(&self, batch: &ArchiveBatch) -> Result<(), ArchiveError> {
        self.batches.write().await.push(batch.clone());
        Ok(())
    }
}
