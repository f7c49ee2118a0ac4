use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const MIN_AGENT_STEPS: u32 = 1;
pub const MAX_AGENT_STEPS: u32 = 50;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Agent configuration, read-only during orchestration. Managed externally
/// (admin CRUD); the worker only looks it up by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub system_prompt: String,
    pub tool_allowlist: Vec<String>,
    pub model: String,
    pub temperature: f64,
    pub max_steps: u32,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentConfig {
    /// Allowlist matching is case-insensitive and exact; anything outside it
    /// is denied regardless of what the tool registry contains.
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tool_allowlist.iter().any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.max_steps < MIN_AGENT_STEPS || self.max_steps > MAX_AGENT_STEPS {
            return Err(DomainError::InvariantViolation(format!(
                "agent `{}` max_steps must be within {MIN_AGENT_STEPS}..={MAX_AGENT_STEPS}, got {}",
                self.id, self.max_steps
            )));
        }
        if self.model.trim().is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "agent `{}` must name a model",
                self.id
            )));
        }
        Ok(())
    }
}
