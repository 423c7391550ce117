//! Archive types: where pruned turns go.
//!
//! When the context window sheds its oldest turns, they are grouped into one
//! [`ArchiveBatch`] and later handed to an [`ArchiveSink`] for durable storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArchiveError;
use crate::message::{Role, Turn};

const DESCRIPTION_MAX_CHARS: usize = 120;

/// An immutable snapshot of the turns removed in one pruning event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBatch {
    /// Unique batch ID
    pub id: String,

    /// Short description, taken from the first user turn in the batch
    pub description: String,

    /// The removed turns, oldest first
    pub turns: Vec<Turn>,

    /// Timestamp of the oldest turn
    pub first_turn_at: DateTime<Utc>,

    /// Timestamp of the newest turn
    pub last_turn_at: DateTime<Utc>,

    /// When the pruning happened
    pub pruned_at: DateTime<Utc>,

    /// Estimated tokens the turns occupied in the window
    pub estimated_tokens: usize,
}

impl ArchiveBatch {
    /// Build a batch from pruned turns. Returns `None` for an empty slice.
    pub fn from_turns(turns: Vec<Turn>, estimated_tokens: usize) -> Option<Self> {
        let first_turn_at = turns.first()?.created_at;
        let last_turn_at = turns.last()?.created_at;
        let description = turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| describe(&t.content))
            .unwrap_or_else(|| "(no user turn)".to_string());

        Some(Self {
            id: Uuid::new_v4().to_string(),
            description,
            turns,
            first_turn_at,
            last_turn_at,
            pruned_at: Utc::now(),
            estimated_tokens,
        })
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

fn describe(content: &str) -> String {
    let line = content.lines().next().unwrap_or("").trim();
    if line.chars().count() <= DESCRIPTION_MAX_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(DESCRIPTION_MAX_CHARS).collect();
    format!("{cut}...")
}

/// Long-term storage for pruned conversation turns.
///
/// `ingest` either acknowledges the batch or fails; the caller never retries
/// a failed batch.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// The sink name (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Store one batch.
    async fn ingest(&self, batch: &ArchiveBatch) -> std::result::Result<(), ArchiveError>;
}
