//! Per-task token attribution.
//!
//! Pure accumulation keyed by the caller's `task_id`. Counts for text are
//! produced by [`crate::tokenizer::count_tokens`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tokenizer::count_tokens;

/// Input/output token totals for one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTokens {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

impl TaskTokens {
    /// Input plus output.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Thread-safe token totals per task.
#[derive(Debug, Default)]
pub struct TokenTracker {
    tasks: RwLock<BTreeMap<String, TaskTokens>>,
}

impl TokenTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add usage for `task_id`.
    pub fn record(&self, task_id: &str, input_tokens: u64, output_tokens: u64) {
        let mut tasks = self.tasks.write();
        let entry = tasks.entry(task_id.to_string()).or_default();
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
    }

    /// Count and add usage from raw text.
    pub fn record_text(&self, task_id: &str, input_text: &str, output_text: &str) {
        self.record(
            task_id,
            count_tokens(input_text) as u64,
            count_tokens(output_text) as u64,
        );
    }

    /// Totals for one task (zero if unknown).
    pub fn total_for(&self, task_id: &str) -> TaskTokens {
        self.tasks.read().get(task_id).copied().unwrap_or_default()
    }

    /// Tokens across all tasks.
    pub fn total(&self) -> u64 {
        self.tasks.read().values().map(TaskTokens::total).sum()
    }

    /// Snapshot of every task's totals.
    pub fn tasks(&self) -> BTreeMap<String, TaskTokens> {
        self.tasks.read().clone()
    }

    /// Forget all usage.
    pub fn reset(&self) {
        self.tasks.write().clear();
    }
}
