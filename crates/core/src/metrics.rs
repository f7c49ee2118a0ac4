//! Observability contract for the orchestration runtime.
//!
//! Metric names and tag keys below are consumed by external dashboards and
//! must not be renamed. Each signal is emitted as a structured tracing event
//! carrying a stable `event_name`, and mirrored into an in-process snapshot
//! so tests can assert on emission without a collector.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::task::TaskStatus;

pub mod names {
    /// Counter: one task record created.
    pub const TASK_CREATED: &str = "task.created";
    /// Counter: one task reached a terminal status. Tag: `status`.
    pub const TASK_COMPLETED: &str = "task.completed";
    /// Histogram: end-to-end duration from creation to finish, milliseconds.
    pub const TASK_DURATION_MS: &str = "task.duration_ms";
    /// Counter: model token usage. Tags: `prompt_tokens`, `completion_tokens`.
    pub const MODEL_TOKENS: &str = "model.tokens";
    /// Histogram: one tool invocation duration, milliseconds. Tag: `tool`.
    pub const TOOL_DURATION_MS: &str = "tool.duration_ms";
    /// Counter: one failed tool invocation. Tag: `tool`.
    pub const TOOL_ERRORS: &str = "tool.errors";
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_created: u64,
    pub tasks_completed: HashMap<String, u64>,
    pub task_durations_ms: Vec<u64>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tool_durations_ms: HashMap<String, Vec<u64>>,
    pub tool_errors: HashMap<String, u64>,
}

#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_created(&self) {
        tracing::info!(event_name = names::TASK_CREATED, "task created");
        self.with(|snapshot| snapshot.tasks_created += 1);
    }

    pub fn task_completed(&self, status: TaskStatus, duration_ms: u64) {
        tracing::info!(
            event_name = names::TASK_COMPLETED,
            status = status.as_str(),
            duration_ms,
            "task completed"
        );
        self.with(|snapshot| {
            *snapshot.tasks_completed.entry(status.as_str().to_string()).or_default() += 1;
            snapshot.task_durations_ms.push(duration_ms);
        });
    }

    pub fn model_tokens(&self, prompt_tokens: u64, completion_tokens: u64) {
        tracing::info!(
            event_name = names::MODEL_TOKENS,
            prompt_tokens,
            completion_tokens,
            "model tokens consumed"
        );
        self.with(|snapshot| {
            snapshot.prompt_tokens += prompt_tokens;
            snapshot.completion_tokens += completion_tokens;
        });
    }

    pub fn tool_invoked(&self, tool: &str, duration_ms: u64, success: bool) {
        tracing::info!(
            event_name = names::TOOL_DURATION_MS,
            tool,
            duration_ms,
            success,
            "tool invoked"
        );
        if !success {
            tracing::warn!(event_name = names::TOOL_ERRORS, tool, "tool invocation failed");
        }
        self.with(|snapshot| {
            snapshot.tool_durations_ms.entry(tool.to_string()).or_default().push(duration_ms);
            if !success {
                *snapshot.tool_errors.entry(tool.to_string()).or_default() += 1;
            }
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|snapshot| snapshot.clone()).unwrap_or_default()
    }

    fn with(&self, update: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut snapshot) = self.inner.lock() {
            update(&mut snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;
    use crate::domain::task::TaskStatus;

    #[test]
    fn snapshot_mirrors_emitted_signals() {
        let metrics = Metrics::new();
        metrics.task_created();
        metrics.task_created();
        metrics.task_completed(TaskStatus::Succeeded, 120);
        metrics.task_completed(TaskStatus::Failed, 45);
        metrics.model_tokens(100, 20);
        metrics.tool_invoked("web.search", 12, true);
        metrics.tool_invoked("web.search", 30, false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_created, 2);
        assert_eq!(snapshot.tasks_completed.get("succeeded"), Some(&1));
        assert_eq!(snapshot.tasks_completed.get("failed"), Some(&1));
        assert_eq!(snapshot.task_durations_ms, vec![120, 45]);
        assert_eq!(snapshot.prompt_tokens, 100);
        assert_eq!(snapshot.completion_tokens, 20);
        assert_eq!(snapshot.tool_durations_ms.get("web.search"), Some(&vec![12, 30]));
        assert_eq!(snapshot.tool_errors.get("web.search"), Some(&1));
    }

    #[test]
    fn clones_share_one_snapshot() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.task_created();
        assert_eq!(metrics.snapshot().tasks_created, 1);
    }
}
