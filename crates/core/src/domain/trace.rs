use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::task::TaskId;

/// Name recorded on model-decision steps.
pub const MODEL_STEP_NAME: &str = "model";

/// Sentinel name recorded on a tool step when the model asked for a tool
/// without naming one.
pub const MISSING_TOOL_NAME: &str = "(none)";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Model,
    Tool,
}

impl TraceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "model" => Some(Self::Model),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One immutable step record belonging to a task. (task_id, step_number) is
/// unique; step numbers are strictly increasing in creation order but not
/// necessarily contiguous.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    pub id: TraceId,
    pub task_id: TaskId,
    pub step_number: u32,
    pub kind: TraceKind,
    pub name: String,
    pub input: Value,
    pub output: Value,
    pub duration_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub created_at: DateTime<Utc>,
}
