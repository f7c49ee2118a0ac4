//! In-memory repositories for tests and for exercising the runtime without
//! a database. Semantics mirror the SQL implementations, including the
//! (task_id, step_number) uniqueness conflict on traces.

use std::collections::HashMap;
use std::sync::Mutex;

use taskrun_core::domain::agent::{AgentConfig, AgentId};
use taskrun_core::domain::task::{AgentTask, TaskId};
use taskrun_core::domain::trace::AgentTrace;

use super::{AgentRepository, RepositoryError, TaskRepository, TraceRepository};

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<TaskId, AgentTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<AgentTask>, RepositoryError> {
        Ok(self.tasks.lock().expect("task map lock").get(id).cloned())
    }

    async fn save(&self, task: &AgentTask) -> Result<(), RepositoryError> {
        self.tasks.lock().expect("task map lock").insert(task.id.clone(), task.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTraceRepository {
    traces: Mutex<Vec<AgentTrace>>,
}

impl InMemoryTraceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TraceRepository for InMemoryTraceRepository {
    async fn insert(&self, trace: &AgentTrace) -> Result<(), RepositoryError> {
        let mut traces = self.traces.lock().expect("trace list lock");
        let duplicate = traces.iter().any(|existing| {
            existing.task_id == trace.task_id && existing.step_number == trace.step_number
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "trace step {} already exists for task {}",
                trace.step_number, trace.task_id
            )));
        }
        traces.push(trace.clone());
        Ok(())
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<AgentTrace>, RepositoryError> {
        let mut listed = self
            .traces
            .lock()
            .expect("trace list lock")
            .iter()
            .filter(|trace| &trace.task_id == task_id)
            .cloned()
            .collect::<Vec<_>>();
        listed.sort_by_key(|trace| trace.step_number);
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: Mutex<HashMap<AgentId, AgentConfig>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agents(agents: impl IntoIterator<Item = AgentConfig>) -> Self {
        let repo = Self::default();
        {
            let mut map = repo.agents.lock().expect("agent map lock");
            for agent in agents {
                map.insert(agent.id.clone(), agent);
            }
        }
        repo
    }
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentConfig>, RepositoryError> {
        Ok(self.agents.lock().expect("agent map lock").get(id).cloned())
    }

    async fn save(&self, agent: &AgentConfig) -> Result<(), RepositoryError> {
        self.agents.lock().expect("agent map lock").insert(agent.id.clone(), agent.clone());
        Ok(())
    }
}
