//! The active conversation and its token budget.
//!
//! [`ContextWindowManager`] owns the turns sent to the LLM. When their
//! estimated size passes `max_context_tokens`, the oldest turns are removed
//! as one contiguous prefix, packed into an [`ArchiveBatch`], and queued in
//! the [`PendingArchiveQueue`]. Pruning is synchronous and never fails; the
//! queue is drained later, at the start of the next request.

use std::collections::VecDeque;

use corvid_config::ContextConfig;
use corvid_core::archive::{ArchiveBatch, ArchiveSink};
use corvid_core::message::{Role, Turn};
use tracing::{debug, error, info, warn};

use super::token::{estimate_conversation, estimate_turn};

/// Budget settings for one conversation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLimits {
    /// Estimated size above which pruning starts.
    pub max_context_tokens: usize,

    /// Turns that are never pruned, regardless of size.
    pub min_recent_turns: usize,

    /// Fraction of `max_context_tokens` that pruning aims for.
    pub retention_ratio: f64,
}

impl WindowLimits {
    /// The size pruning reduces the conversation to.
    pub fn retention_target(&self) -> usize {
        (self.max_context_tokens as f64 * self.retention_ratio).floor() as usize
    }
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for WindowLimits {
    fn from(config: &ContextConfig) -> Self {
        Self {
            max_context_tokens: config.max_context_tokens,
            min_recent_turns: config.min_recent_turns,
            retention_ratio: config.retention_ratio,
        }
    }
}

/// What one pruning pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneReport {
    pub batch_id: String,
    pub turns_removed: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// A batch the sink acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedBatch {
    pub batch_id: String,
    pub turns: usize,
}

/// A batch the sink rejected. It has been dropped and will not be retried.
#[derive(Debug, Clone, PartialEq)]
pub struct LostBatch {
    pub batch_id: String,
    pub turns: usize,
    pub reason: String,
}

/// Outcome of one [`ContextWindowManager::drain_pending`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub ingested: Vec<IngestedBatch>,
    pub lost: Vec<LostBatch>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.ingested.is_empty() && self.lost.is_empty()
    }
}

/// FIFO of batches waiting for the archive sink.
#[derive(Debug, Default)]
pub struct PendingArchiveQueue {
    batches: VecDeque<ArchiveBatch>,
}

impl PendingArchiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: ArchiveBatch) {
        self.batches.push_back(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Queued batch ids, oldest first.
    pub fn batch_ids(&self) -> Vec<&str> {
        self.batches.iter().map(|b| b.id.as_str()).collect()
    }

    /// Hand every queued batch to `sink`, oldest first.
    ///
    /// A batch leaves the queue only once the sink has answered for it. If
    /// this future is dropped mid-ingest, that batch stays at the front and
    /// is offered again by the next drain, so callers that must not archive
    /// a batch twice let the drain finish.
    pub async fn drain(&mut self, sink: &dyn ArchiveSink) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(batch) = self.batches.front() {
            let outcome = sink.ingest(batch).await;
            let Some(batch) = self.batches.pop_front() else {
                break;
            };

            match outcome {
                Ok(()) => {
                    info!(
                        batch_id = %batch.id,
                        turns = batch.len(),
                        sink = sink.name(),
                        "Archived pruned turns"
                    );
                    report.ingested.push(IngestedBatch {
                        batch_id: batch.id,
                        turns: batch.turns.len(),
                    });
                }
                Err(e) => {
                    error!(
                        batch_id = %batch.id,
                        turns = batch.len(),
                        sink = sink.name(),
                        error = %e,
                        "Archive batch lost"
                    );
                    report.lost.push(LostBatch {
                        batch_id: batch.id,
                        turns: batch.turns.len(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// Owns the active conversation and the queue of pruned batches.
#[derive(Debug)]
pub struct ContextWindowManager {
    limits: WindowLimits,
    /// Turns with their cached estimates, oldest first.
    turns: VecDeque<(Turn, usize)>,
    total_tokens: usize,
    pending: PendingArchiveQueue,
}

impl ContextWindowManager {
    pub fn new(limits: WindowLimits) -> Self {
        Self {
            limits,
            turns: VecDeque::new(),
            total_tokens: 0,
            pending: PendingArchiveQueue::new(),
        }
    }

    pub fn limits(&self) -> WindowLimits {
        self.limits
    }

    /// Add a turn at the end. Never prunes.
    pub fn append(&mut self, turn: Turn) {
        let tokens = estimate_turn(&turn);
        self.total_tokens += tokens;
        self.turns.push_back((turn, tokens));
    }

    /// Prune the oldest turns if the conversation is over budget.
    ///
    /// Removes a prefix until the estimate is at or below the retention
    /// target, or only `min_recent_turns` remain. Returns `None` when nothing
    /// was removed.
    pub fn enforce_budget(&mut self) -> Option<PruneReport> {
        if self.total_tokens <= self.limits.max_context_tokens {
            return None;
        }

        let report = self.prune_until(self.limits.retention_target());
        if self.total_tokens > self.limits.max_context_tokens {
            warn!(
                tokens = self.total_tokens,
                max = self.limits.max_context_tokens,
                turns = self.turns.len(),
                "Context still over budget with only the most recent turns left"
            );
        }
        report
    }

    /// Prune to the retention target even when under the ceiling.
    ///
    /// Used for an explicit retry after the backend reported an overflow.
    pub fn prune_to_retention(&mut self) -> Option<PruneReport> {
        self.prune_until(self.limits.retention_target())
    }

    fn prune_until(&mut self, target: usize) -> Option<PruneReport> {
        let tokens_before = self.total_tokens;
        let mut removed = Vec::new();
        let mut removed_tokens = 0;

        while self.total_tokens > target && self.turns.len() > self.limits.min_recent_turns {
            let Some((turn, tokens)) = self.turns.pop_front() else {
                break;
            };
            self.total_tokens -= tokens;
            removed_tokens += tokens;
            removed.push(turn);
        }

        let batch = ArchiveBatch::from_turns(removed, removed_tokens)?;
        let report = PruneReport {
            batch_id: batch.id.clone(),
            turns_removed: batch.len(),
            tokens_before,
            tokens_after: self.total_tokens,
        };
        info!(
            batch_id = %report.batch_id,
            turns_removed = report.turns_removed,
            tokens_before,
            tokens_after = report.tokens_after,
            "Pruned context window"
        );
        self.pending.push(batch);
        Some(report)
    }

    /// Archive everything queued by earlier pruning.
    pub async fn drain_pending(&mut self, sink: &dyn ArchiveSink) -> DrainReport {
        if self.pending.is_empty() {
            return DrainReport::default();
        }
        debug!(batches = self.pending.len(), sink = sink.name(), "Draining archive queue");
        self.pending.drain(sink).await
    }

    /// The turns to send to the LLM.
    ///
    /// Pruning can cut a request in half, leaving tool results or assistant
    /// turns whose user turn is gone at the front. Those are skipped up to
    /// the first user turn. If no user turn is left, only leading tool
    /// results are skipped.
    pub fn sendable_turns(&self) -> Vec<Turn> {
        let start = self
            .turns
            .iter()
            .position(|(t, _)| t.role == Role::User)
            .or_else(|| self.turns.iter().position(|(t, _)| t.role != Role::Tool))
            .unwrap_or(self.turns.len());

        self.turns
            .iter()
            .skip(start)
            .map(|(turn, _)| turn.clone())
            .collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().map(|(turn, _)| turn)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Incrementally maintained estimate.
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Full recomputation of the estimate, for checking the running total.
    pub fn recompute_tokens(&self) -> usize {
        let turns: Vec<Turn> = self.turns().cloned().collect();
        estimate_conversation(&turns)
    }

    pub fn pending(&self) -> &PendingArchiveQueue {
        &self.pending
    }

    /// Drop the active conversation. Queued batches stay queued.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.total_tokens = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corvid_core::error::ArchiveError;
    use corvid_core::tool::{ToolCallRequest, ToolCallResult};
    use std::sync::Mutex;

    fn limits(max: usize, min_recent: usize) -> WindowLimits {
        WindowLimits {
            max_context_tokens: max,
            min_recent_turns: min_recent,
            retention_ratio: 0.5,
        }
    }

    /// A user turn estimated at exactly `tokens`.
    fn sized_turn(tokens: usize) -> Turn {
        Turn::user("x".repeat((tokens - 4) * 4))
    }

    /// Records batch ids; fails every batch when `reject_all` is set.
    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
        reject_all: bool,
    }

    #[async_trait]
    impl ArchiveSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn ingest(&self, batch: &ArchiveBatch) -> Result<(), ArchiveError> {
            self.seen.lock().unwrap().push(batch.id.clone());
            if self.reject_all {
                Err(ArchiveError::Storage("disk full".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn under_budget_is_noop() {
        let mut window = ContextWindowManager::new(limits(1_000, 2));
        window.append(sized_turn(100));
        window.append(sized_turn(100));
        assert!(window.enforce_budget().is_none());
        assert_eq!(window.len(), 2);
        assert!(window.pending().is_empty());
    }

    #[test]
    fn append_does_not_prune() {
        let mut window = ContextWindowManager::new(limits(100, 1));
        for _ in 0..5 {
            window.append(sized_turn(50));
        }
        assert_eq!(window.len(), 5);
        assert_eq!(window.total_tokens(), 250);
    }

    #[test]
    fn prunes_to_retention_target() {
        // 160,000 tokens against a 150,000 ceiling: target 75,000.
        let mut window = ContextWindowManager::new(limits(150_000, 10));
        for _ in 0..40 {
            window.append(sized_turn(4_000));
        }
        assert_eq!(window.total_tokens(), 160_000);

        let report = window.enforce_budget().unwrap();
        assert!(window.total_tokens() <= 75_000);
        assert!(window.len() >= 10);
        assert_eq!(report.turns_removed, 22);
        assert_eq!(report.tokens_before, 160_000);
        assert_eq!(report.tokens_after, window.total_tokens());
        assert_eq!(window.pending().len(), 1);
    }

    #[test]
    fn removes_only_a_prefix() {
        let mut window = ContextWindowManager::new(limits(1_000, 3));
        let originals: Vec<Turn> = (0..12).map(|_| sized_turn(120)).collect();
        for turn in &originals {
            window.append(turn.clone());
        }

        let report = window.enforce_budget().unwrap();
        let kept: Vec<&Turn> = window.turns().collect();
        let expected: Vec<&Turn> = originals[report.turns_removed..].iter().collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn min_recent_turns_is_a_floor() {
        let mut window = ContextWindowManager::new(limits(1_000, 3));
        for _ in 0..5 {
            window.append(sized_turn(2_000));
        }

        let report = window.enforce_budget().unwrap();
        assert_eq!(report.turns_removed, 2);
        assert_eq!(window.len(), 3);
        // Still over the ceiling; the newest turns win.
        assert!(window.total_tokens() > 1_000);
    }

    #[test]
    fn fewer_turns_than_floor_are_kept() {
        let mut window = ContextWindowManager::new(limits(100, 5));
        window.append(sized_turn(500));
        window.append(sized_turn(500));
        assert!(window.enforce_budget().is_none());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn budget_property_holds_across_shapes() {
        for (count, size, min_recent) in [(30, 90, 4), (8, 700, 2), (50, 33, 10), (3, 5_000, 1)] {
            let mut window = ContextWindowManager::new(limits(1_000, min_recent));
            for _ in 0..count {
                window.append(sized_turn(size));
            }
            window.enforce_budget();
            assert!(
                window.total_tokens() <= 1_000 || window.len() == min_recent.min(count),
                "count={count} size={size}"
            );
        }
    }

    #[test]
    fn running_total_matches_recomputation() {
        let mut window = ContextWindowManager::new(limits(500, 2));
        let call = ToolCallRequest {
            id: "c1".into(),
            name: "calculate_date_range".into(),
            arguments: serde_json::json!({"period": "last week"}),
        };
        for i in 0..20 {
            window.append(Turn::user(format!("question {i} ").repeat(i + 1)));
            window.append(Turn::assistant_with_calls("", vec![call.clone()]));
            window.append(Turn::tool_result(&ToolCallResult::success(&call, "{}")));
            window.enforce_budget();
            assert_eq!(window.total_tokens(), window.recompute_tokens());
        }
    }

    #[test]
    fn prune_to_retention_ignores_ceiling() {
        let mut window = ContextWindowManager::new(limits(1_000, 1));
        for _ in 0..8 {
            window.append(sized_turn(100));
        }
        assert!(window.enforce_budget().is_none());

        let report = window.prune_to_retention().unwrap();
        assert_eq!(report.turns_removed, 3);
        assert_eq!(window.total_tokens(), 500);
    }

    #[test]
    fn sendable_turns_skip_orphaned_prefix() {
        let call = ToolCallRequest {
            id: "c1".into(),
            name: "calculate_date_range".into(),
            arguments: serde_json::json!({}),
        };
        let mut window = ContextWindowManager::new(limits(10_000, 1));
        window.append(Turn::tool_result(&ToolCallResult::success(&call, "orphan")));
        window.append(Turn::assistant("done"));
        window.append(Turn::user("next question"));

        let sendable = window.sendable_turns();
        assert_eq!(sendable.len(), 1);
        assert_eq!(sendable[0].content, "next question");
    }

    #[test]
    fn sendable_turns_without_user_turn() {
        let call = ToolCallRequest {
            id: "c1".into(),
            name: "calculate_date_range".into(),
            arguments: serde_json::json!({}),
        };
        let mut window = ContextWindowManager::new(limits(10_000, 1));
        window.append(Turn::tool_result(&ToolCallResult::success(&call, "orphan")));
        window.append(Turn::assistant_with_calls("", vec![call.clone()]));
        window.append(Turn::tool_result(&ToolCallResult::success(&call, "ok")));

        let sendable = window.sendable_turns();
        assert_eq!(sendable.len(), 2);
        assert_eq!(sendable[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn drain_is_fifo_and_idempotent() {
        let mut window = ContextWindowManager::new(limits(100, 1));
        for _ in 0..3 {
            window.append(sized_turn(80));
            window.append(sized_turn(80));
            window.enforce_budget();
        }
        let queued: Vec<String> = window
            .pending()
            .batch_ids()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(queued.len(), 3);

        let sink = RecordingSink::default();
        let report = window.drain_pending(&sink).await;
        assert_eq!(report.ingested.len(), 3);
        assert!(report.lost.is_empty());
        assert_eq!(*sink.seen.lock().unwrap(), queued);

        let again = window.drain_pending(&sink).await;
        assert!(again.is_empty());
        assert_eq!(sink.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_not_retried() {
        let mut window = ContextWindowManager::new(limits(100, 1));
        window.append(sized_turn(80));
        window.append(sized_turn(80));
        let report = window.enforce_budget().unwrap();

        let failing = RecordingSink {
            reject_all: true,
            ..Default::default()
        };
        let drained = window.drain_pending(&failing).await;
        assert_eq!(drained.lost.len(), 1);
        assert_eq!(drained.lost[0].batch_id, report.batch_id);
        assert!(drained.lost[0].reason.contains("disk full"));
        assert!(window.pending().is_empty());

        let healthy = RecordingSink::default();
        assert!(window.drain_pending(&healthy).await.is_empty());
        assert!(healthy.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn clear_keeps_pending_batches() {
        let mut window = ContextWindowManager::new(limits(100, 1));
        window.append(sized_turn(80));
        window.append(sized_turn(80));
        window.enforce_budget();
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.total_tokens(), 0);
        assert_eq!(window.pending().len(), 1);
    }
}
