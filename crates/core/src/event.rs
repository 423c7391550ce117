//! Domain event system: decoupled observation of the orchestrator.
//!
//! Events are published when something interesting happens during a request.
//! Front ends can subscribe to show progress without coupling to the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user request entered the loop
    RequestStarted {
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call finished (successfully or not)
    ToolDispatched {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The oldest turns were pruned into an archive batch
    ContextPruned {
        batch_id: String,
        turns_removed: usize,
        tokens_before: usize,
        tokens_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch was acknowledged by the archive sink
    ArchiveIngested {
        batch_id: String,
        turns: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch could not be archived and was dropped
    ArchiveBatchLost {
        batch_id: String,
        turns: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A request reached a terminal state
    RequestFinished {
        iterations: usize,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
