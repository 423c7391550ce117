//! Context budgeting for the active conversation.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`token`] | Conservative per-turn token estimates |
//! | [`window`] | Active turns, prefix pruning, pending archive batches |

pub mod token;
pub mod window;

pub use token::{estimate_conversation, estimate_text, estimate_tools, estimate_turn};
pub use window::{
    ContextWindowManager, DrainReport, IngestedBatch, LostBatch, PendingArchiveQueue, PruneReport,
    WindowLimits,
};
