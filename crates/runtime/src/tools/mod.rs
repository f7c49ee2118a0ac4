//! Tool contract and registry.
//!
//! A tool is a named, sandboxed capability the orchestrator invokes on the
//! model's request. Tool failures are always represented as a
//! `(success=false, error)` outcome, never as a propagated error, so the
//! orchestrator can trace every invocation.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use taskrun_core::domain::task::TaskId;

pub mod db_query;
pub mod file_write;
pub mod web_search;

pub use db_query::DbQueryTool;
pub use file_write::FileWriteTool;
pub use web_search::WebSearchTool;

/// Execution context handed to every tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub task_id: TaskId,
    pub step_number: u32,
    pub tenant: Option<String>,
    pub requested_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Filled by the registry when the invocation is timed.
    pub duration_ms: u64,
}

impl ToolOutcome {
    pub fn ok(output: Value) -> Self {
        Self { success: true, output: Some(output), error: None, duration_ms: 0 }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, output: None, error: Some(error.into()), duration_ms: 0 }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical tool name; resolution is case-insensitive.
    fn name(&self) -> &str;

    /// Must not panic and must not return early through an error channel;
    /// failures are reported through the outcome.
    async fn run(&self, input: &Value, ctx: &ToolContext) -> ToolOutcome;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last registration wins on a name collision.
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_ascii_lowercase(), Box::new(tool));
    }

    pub fn resolve(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(&name.to_ascii_lowercase()).map(|tool| tool.as_ref())
    }

    /// Runs the tool and measures its duration.
    pub async fn invoke(&self, tool: &dyn Tool, input: &Value, ctx: &ToolContext) -> ToolOutcome {
        let started = Instant::now();
        let mut outcome = tool.run(input, ctx).await;
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
