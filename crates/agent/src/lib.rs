//! The conversation core of corvid.
//!
//! The agent follows a **Think → Act** cycle per user request:
//!
//! 1. **Receive** a user message and archive turns pruned earlier
//! 2. **Think**: send the conversation and tool schemas to the LLM
//! 3. **If tool calls**: dispatch them through the [`ToolRegistry`], append
//!    results in request order, prune if over budget, back to step 2
//! 4. **If text response**: that is the final answer
//!
//! The loop continues until the LLM responds with text only, the iteration
//! ceiling is reached, or the caller cancels.

pub mod context;
pub mod orchestrator;
pub mod registry;

pub use context::{
    ContextWindowManager, DrainReport, PendingArchiveQueue, PruneReport, WindowLimits,
};
pub use orchestrator::{Orchestrator, OrchestratorSettings, UsageTotals, describe_failure};
pub use registry::{ServerOptions, ToolRegistry, ValidatedCall};
