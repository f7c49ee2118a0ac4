use async_trait::async_trait;
use thiserror::Error;

use taskrun_core::domain::agent::{AgentConfig, AgentId};
use taskrun_core::domain::task::{AgentTask, TaskId};
use taskrun_core::domain::trace::AgentTrace;

pub mod agent;
pub mod memory;
pub mod task;
pub mod trace;

pub use agent::SqlAgentRepository;
pub use memory::{InMemoryAgentRepository, InMemoryTaskRepository, InMemoryTraceRepository};
pub use task::SqlTaskRepository;
pub use trace::SqlTraceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("uniqueness conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<AgentTask>, RepositoryError>;
    async fn save(&self, task: &AgentTask) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TraceRepository: Send + Sync {
    /// Inserts one immutable trace row. A duplicate (task_id, step_number)
    /// surfaces as `RepositoryError::Conflict`.
    async fn insert(&self, trace: &AgentTrace) -> Result<(), RepositoryError>;

    /// Traces in creation order.
    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<AgentTrace>, RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentConfig>, RepositoryError>;
    async fn save(&self, agent: &AgentConfig) -> Result<(), RepositoryError>;
}
