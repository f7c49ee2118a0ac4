//! The queue consumer. One worker owns the receiving end of the task queue,
//! claims Pending tasks, and hands them to the orchestrator. Per-task errors
//! are contained: a failing task never takes the loop down.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use taskrun_core::config::WorkerConfig;
use taskrun_core::domain::task::{AgentTask, TaskId, TaskStatus};
use taskrun_core::metrics::Metrics;
use taskrun_db::repositories::{AgentRepository, TaskRepository};

use crate::cancel::CancellationRegistry;
use crate::orchestrator::Orchestrator;
use crate::queue::TaskQueueReceiver;

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// Attempts to load a freshly enqueued task before giving up on it.
    /// Covers read-replica lag between the enqueue and the dequeue.
    pub load_retry_attempts: u32,
    pub load_retry_delay: Duration,
    /// Pause before the single transient-error retry.
    pub transient_retry_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            load_retry_attempts: 5,
            load_retry_delay: Duration::from_millis(50),
            transient_retry_delay: Duration::from_millis(250),
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            load_retry_attempts: config.load_retry_attempts,
            load_retry_delay: Duration::from_millis(config.load_retry_delay_ms),
            transient_retry_delay: Duration::from_millis(config.transient_retry_delay_ms),
        }
    }
}

pub struct Worker {
    receiver: TaskQueueReceiver,
    tasks: Arc<dyn TaskRepository>,
    agents: Arc<dyn AgentRepository>,
    orchestrator: Arc<Orchestrator>,
    cancellations: CancellationRegistry,
    shutdown: CancellationToken,
    metrics: Metrics,
    settings: WorkerSettings,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: TaskQueueReceiver,
        tasks: Arc<dyn TaskRepository>,
        agents: Arc<dyn AgentRepository>,
        orchestrator: Arc<Orchestrator>,
        cancellations: CancellationRegistry,
        shutdown: CancellationToken,
        metrics: Metrics,
        settings: WorkerSettings,
    ) -> Self {
        Self { receiver, tasks, agents, orchestrator, cancellations, shutdown, metrics, settings }
    }

    /// Runs until the queue closes or shutdown is signaled.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("worker shutting down");
                    break;
                }
                next = self.receiver.recv() => {
                    let Some(task_id) = next else {
                        tracing::info!("task queue closed, worker exiting");
                        break;
                    };
                    if let Err(error) = self.process(&task_id).await {
                        tracing::error!(%task_id, %error, "task processing failed");
                    }
                    // A cancel that raced the terminal write would otherwise
                    // sit in the registry forever.
                    self.cancellations.try_clear(&task_id);
                }
            }
        }
    }

    async fn process(&self, task_id: &TaskId) -> anyhow::Result<()> {
        let Some(mut task) = self.load_with_retry(task_id).await? else {
            tracing::warn!(%task_id, "dequeued task not found, skipping");
            return Ok(());
        };
        if task.status != TaskStatus::Pending {
            tracing::info!(%task_id, status = task.status.as_str(), "task no longer pending");
            return Ok(());
        }

        task.mark_running(Utc::now())?;
        self.tasks.save(&task).await?;

        let agent = match self.agents.find_by_id(&task.agent_id).await? {
            None => return self.fail(task, "Agent not found").await,
            Some(agent) if !agent.is_enabled => {
                return self.fail(task, "Agent is disabled").await;
            }
            Some(agent) => agent,
        };

        let outcome = tokio::select! {
            result = self.orchestrator.run(task.clone(), &agent) => result,
            _ = self.shutdown.cancelled() => {
                self.cancel_interrupted(task_id).await;
                return Ok(());
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(error) if is_transient(&error) => {
                tracing::warn!(%task_id, %error, "transient failure, retrying once");
                tokio::time::sleep(self.settings.transient_retry_delay).await;
                // Reload so the retry sees tokens already persisted mid-run.
                let Some(task) = self.tasks.find_by_id(task_id).await? else {
                    return Ok(());
                };
                if task.status != TaskStatus::Running {
                    return Ok(());
                }
                match self.orchestrator.run(task.clone(), &agent).await {
                    Ok(()) => Ok(()),
                    Err(error) => self.fail(task, &error.to_string()).await,
                }
            }
            Err(error) => {
                let Some(task) = self.tasks.find_by_id(task_id).await? else {
                    return Ok(());
                };
                if task.is_terminal() {
                    return Ok(());
                }
                self.fail(task, &error.to_string()).await
            }
        }
    }

    async fn load_with_retry(
        &self,
        task_id: &TaskId,
    ) -> anyhow::Result<Option<AgentTask>> {
        let mut attempt = 0;
        loop {
            if let Some(task) = self.tasks.find_by_id(task_id).await? {
                return Ok(Some(task));
            }
            attempt += 1;
            if attempt >= self.settings.load_retry_attempts {
                return Ok(None);
            }
            tokio::time::sleep(self.settings.load_retry_delay).await;
        }
    }

    async fn fail(&self, mut task: AgentTask, message: &str) -> anyhow::Result<()> {
        task.mark_failed(message, Utc::now())?;
        self.tasks.save(&task).await?;
        let duration_ms = task
            .finished_at
            .map(|finished| (finished - task.created_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.metrics.task_completed(task.status, duration_ms);
        tracing::warn!(task_id = %task.id, %message, "task failed");
        Ok(())
    }

    /// A run interrupted by shutdown is marked Canceled so it is never left
    /// Running forever. Best-effort: the process is going down.
    async fn cancel_interrupted(&self, task_id: &TaskId) {
        let Ok(Some(mut task)) = self.tasks.find_by_id(task_id).await else {
            return;
        };
        if task.status != TaskStatus::Running {
            return;
        }
        if task.mark_canceled(Utc::now()).is_ok() {
            if let Err(error) = self.tasks.save(&task).await {
                tracing::error!(%task_id, %error, "could not persist shutdown cancellation");
            }
        }
    }
}

/// Matches driver-level conditions worth one retry. Anything else fails the
/// task immediately.
fn is_transient(error: &anyhow::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    ["timeout", "deadlock", "serialization", "locked", "busy"]
        .iter()
        .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::is_transient;

    #[test]
    fn transient_detection_is_substring_based() {
        assert!(is_transient(&anyhow::anyhow!("database is locked")));
        assert!(is_transient(&anyhow::anyhow!("connection Timeout after 5s")));
        assert!(is_transient(&anyhow::anyhow!("SQLITE_BUSY")));
        assert!(!is_transient(&anyhow::anyhow!("model rejected the request")));
    }
}
