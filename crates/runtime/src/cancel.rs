use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use taskrun_core::domain::task::TaskId;

/// Shared set of tasks with a pending cancellation request.
///
/// Cancellation is cooperative: callers record a request here and the
/// orchestrator polls at each loop iteration boundary, so the latency is
/// bounded by one step. Clearing is done by the side that acts on the
/// request.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    requests: Arc<Mutex<HashMap<TaskId, DateTime<Utc>>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self, task_id: &TaskId) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.entry(task_id.clone()).or_insert_with(Utc::now);
        }
    }

    pub fn is_cancel_requested(&self, task_id: &TaskId) -> bool {
        self.requests.lock().map(|requests| requests.contains_key(task_id)).unwrap_or(false)
    }

    /// Removes the request if present; returns whether one existed.
    pub fn try_clear(&self, task_id: &TaskId) -> bool {
        self.requests.lock().map(|mut requests| requests.remove(task_id).is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use taskrun_core::domain::task::TaskId;

    use super::CancellationRegistry;

    #[test]
    fn request_is_visible_until_cleared() {
        let registry = CancellationRegistry::new();
        let task = TaskId("t-1".to_string());

        assert!(!registry.is_cancel_requested(&task));
        registry.request_cancel(&task);
        assert!(registry.is_cancel_requested(&task));

        assert!(registry.try_clear(&task));
        assert!(!registry.is_cancel_requested(&task));
        assert!(!registry.try_clear(&task));
    }

    #[test]
    fn repeated_requests_are_idempotent() {
        let registry = CancellationRegistry::new();
        let task = TaskId("t-1".to_string());
        registry.request_cancel(&task);
        registry.request_cancel(&task);
        assert!(registry.try_clear(&task));
        assert!(!registry.is_cancel_requested(&task));
    }

    #[test]
    fn clones_share_state() {
        let registry = CancellationRegistry::new();
        let clone = registry.clone();
        let task = TaskId("t-1".to_string());
        clone.request_cancel(&task);
        assert!(registry.is_cancel_requested(&task));
    }
}
