//! Task lifecycle entrypoints used by the HTTP surface and the CLI:
//! create/enqueue, inspect, cancel, retry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use taskrun_core::domain::agent::AgentId;
use taskrun_core::domain::task::{AgentTask, GuardrailDecision, TaskId, TaskStatus};
use taskrun_core::domain::trace::AgentTrace;
use taskrun_core::errors::DomainError;
use taskrun_core::metrics::Metrics;
use taskrun_db::repositories::{
    AgentRepository, RepositoryError, TaskRepository, TraceRepository,
};

use crate::cancel::CancellationRegistry;
use crate::queue::TaskQueue;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("task {0} is already terminal ({1})")]
    TerminalConflict(TaskId, TaskStatus),
    #[error("task {0} is not terminal yet ({1})")]
    NotTerminal(TaskId, TaskStatus),
    #[error("task queue is closed")]
    QueueClosed,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug)]
pub struct CreateTaskRequest {
    pub agent_id: AgentId,
    pub input: Value,
    pub tenant: Option<String>,
    pub requested_by: Option<String>,
    pub guardrail_decision: Option<GuardrailDecision>,
    pub guardrail_metadata: Option<Value>,
    /// Set false to create the record without scheduling it, e.g. for
    /// tasks held back pending guardrail escalation.
    pub enqueue: bool,
}

impl CreateTaskRequest {
    pub fn new(agent_id: AgentId, input: Value) -> Self {
        Self {
            agent_id,
            input,
            tenant: None,
            requested_by: None,
            guardrail_decision: None,
            guardrail_metadata: None,
            enqueue: true,
        }
    }
}

pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    traces: Arc<dyn TraceRepository>,
    agents: Arc<dyn AgentRepository>,
    queue: TaskQueue,
    cancellations: CancellationRegistry,
    metrics: Metrics,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        traces: Arc<dyn TraceRepository>,
        agents: Arc<dyn AgentRepository>,
        queue: TaskQueue,
        cancellations: CancellationRegistry,
        metrics: Metrics,
    ) -> Self {
        Self { tasks, traces, agents, queue, cancellations, metrics }
    }

    pub async fn create_task(
        &self,
        request: CreateTaskRequest,
    ) -> Result<AgentTask, ServiceError> {
        if self.agents.find_by_id(&request.agent_id).await?.is_none() {
            return Err(ServiceError::AgentNotFound(request.agent_id));
        }

        let mut task = AgentTask::new(request.agent_id, request.input);
        task.tenant = request.tenant;
        task.requested_by = request.requested_by;
        task.guardrail_decision = request.guardrail_decision;
        task.guardrail_metadata = request.guardrail_metadata;

        self.tasks.save(&task).await?;
        self.metrics.task_created();
        tracing::info!(task_id = %task.id, agent_id = %task.agent_id, "task created");

        if request.enqueue {
            self.queue
                .enqueue(task.id.clone())
                .await
                .map_err(|_| ServiceError::QueueClosed)?;
        }
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<AgentTask, ServiceError> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| ServiceError::TaskNotFound(task_id.clone()))
    }

    pub async fn list_traces(&self, task_id: &TaskId) -> Result<Vec<AgentTrace>, ServiceError> {
        self.get_task(task_id).await?;
        Ok(self.traces.list_for_task(task_id).await?)
    }

    /// Pending tasks cancel immediately; Running tasks get a cooperative
    /// request honored at the next loop iteration; terminal tasks conflict.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<AgentTask, ServiceError> {
        let mut task = self.get_task(task_id).await?;
        match task.status {
            TaskStatus::Pending => {
                task.mark_canceled(Utc::now())?;
                self.tasks.save(&task).await?;
                let duration_ms = task
                    .finished_at
                    .map(|finished| (finished - task.created_at).num_milliseconds().max(0) as u64)
                    .unwrap_or(0);
                self.metrics.task_completed(task.status, duration_ms);
                tracing::info!(%task_id, "pending task canceled");
                Ok(task)
            }
            TaskStatus::Running => {
                self.cancellations.request_cancel(task_id);
                // The run may have turned terminal while the request was
                // recorded; a request for a finished task is moot.
                let current = self.get_task(task_id).await?;
                if current.is_terminal() {
                    self.cancellations.try_clear(task_id);
                    return Err(ServiceError::TerminalConflict(task_id.clone(), current.status));
                }
                tracing::info!(%task_id, "cancellation requested for running task");
                Ok(current)
            }
            status => {
                self.cancellations.try_clear(task_id);
                Err(ServiceError::TerminalConflict(task_id.clone(), status))
            }
        }
    }

    /// Creates a fresh task from a terminal one. The original record is left
    /// untouched; the retry has its own id, traces, and accounting.
    pub async fn retry_task(&self, task_id: &TaskId) -> Result<AgentTask, ServiceError> {
        let original = self.get_task(task_id).await?;
        if !original.is_terminal() {
            return Err(ServiceError::NotTerminal(task_id.clone(), original.status));
        }

        let mut retry = AgentTask::new(original.agent_id.clone(), original.input.clone());
        retry.tenant = original.tenant.clone();
        retry.requested_by = original.requested_by.clone();
        retry.guardrail_decision = original.guardrail_decision;
        retry.guardrail_metadata = original.guardrail_metadata.clone();

        self.tasks.save(&retry).await?;
        self.metrics.task_created();
        self.queue
            .enqueue(retry.id.clone())
            .await
            .map_err(|_| ServiceError::QueueClosed)?;
        tracing::info!(original = %task_id, retry = %retry.id, "task retried");
        Ok(retry)
    }
}
