use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::AgentId;
use crate::errors::DomainError;

/// Terminal error messages are bounded so a runaway driver message can never
/// bloat the task record.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the external guardrail evaluation, recorded at creation time.
/// The runtime never computes this; it only carries it on the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailDecision {
    Allow,
    Deny,
    Escalate,
}

impl GuardrailDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Escalate => "escalate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "escalate" => Some(Self::Escalate),
            _ => None,
        }
    }
}

/// One asynchronous agent task, tracked from Pending through a terminal
/// status. Mutable fields are owned by the worker/orchestrator while a run
/// is in flight; status transitions are monotonic toward a terminal state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub agent_id: AgentId,
    pub input: Value,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub tenant: Option<String>,
    pub requested_by: Option<String>,
    pub guardrail_decision: Option<GuardrailDecision>,
    pub guardrail_metadata: Option<Value>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    pub fn new(agent_id: AgentId, input: Value) -> Self {
        Self {
            id: TaskId::generate(),
            agent_id,
            input,
            status: TaskStatus::Pending,
            result: None,
            error_message: None,
            tenant: None,
            requested_by: None,
            guardrail_decision: None,
            guardrail_metadata: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            estimated_cost: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Pending -> Running, entered exactly once by the worker.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != TaskStatus::Pending {
            return Err(DomainError::InvalidTaskTransition {
                from: self.status,
                to: TaskStatus::Running,
            });
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_succeeded(&mut self, result: Value, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_terminal(TaskStatus::Succeeded, now)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        error: impl AsRef<str>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_terminal(TaskStatus::Failed, now)?;
        self.error_message = Some(truncate_error(error.as_ref()));
        Ok(())
    }

    pub fn mark_canceled(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_terminal(TaskStatus::Canceled, now)?;
        self.error_message = Some("Canceled".to_string());
        Ok(())
    }

    /// Token counters only increase.
    pub fn add_tokens(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(completion_tokens);
    }

    pub fn add_cost(&mut self, amount: Decimal) {
        self.estimated_cost = Some(self.estimated_cost.unwrap_or_default() + amount);
    }

    fn transition_terminal(
        &mut self,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidTaskTransition { from: self.status, to });
        }
        self.status = to;
        self.finished_at = Some(now);
        Ok(())
    }
}

/// Truncates on a char boundary so a multi-byte driver message cannot panic
/// the terminal write.
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}
