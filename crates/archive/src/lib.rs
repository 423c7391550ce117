//! Archive sink implementations for corvid.
//!
//! Pruned turns leave the context window as [`ArchiveBatch`]es; a sink gives
//! them durable storage so they can be retrieved by other tools later.

pub mod file_sink;
pub mod in_memory;
pub mod noop;

pub use file_sink::JsonlFileSink;
pub use in_memory::InMemorySink;
pub use noop::NoopSink;

use corvid_config::ArchiveConfig;
use corvid_core::archive::ArchiveSink;
use std::sync::Arc;

/// Build the sink selected by `[archive] backend`.
///
/// Unknown backend names are rejected by config validation, so anything that
/// reaches the fallback arm is treated as "none".
pub fn build_sink(config: &ArchiveConfig) -> Arc<dyn ArchiveSink> {
    match config.backend.as_str() {
        "file" => Arc::new(JsonlFileSink::new(config.resolved_path())),
        "memory" => Arc::new(InMemorySink::new()),
        _ => Arc::new(NoopSink),
    }
}
