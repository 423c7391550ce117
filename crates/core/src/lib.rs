//! # corvid core
//!
//! Domain types, traits, and error definitions for the corvid assistant client.
//! This crate has **no transport dependencies**: it defines the model that the
//! provider, tool-server, archive and agent crates implement against.
//!
//! ## Seams
//!
//! - [`Provider`]: an LLM backend that turns a conversation into either a
//!   final answer or a set of tool calls.
//! - [`ToolServer`]: an external (or in-process) collection of named,
//!   schema-described tools.
//! - [`ArchiveSink`]: long-term storage for turns pruned from the context
//!   window.

pub mod archive;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use archive::{ArchiveBatch, ArchiveSink};
pub use error::{ArchiveError, Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Role, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{Tool, ToolCallRequest, ToolCallResult, ToolOutcome, ToolServer};
