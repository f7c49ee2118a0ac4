use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use taskrun_core::domain::task::AgentTask;
use taskrun_core::domain::trace::{AgentTrace, TraceId, TraceKind, MODEL_STEP_NAME};
use taskrun_db::repositories::{RepositoryError, TraceRepository};

use crate::model::{ModelAction, ModelReply};
use crate::tools::ToolOutcome;

/// Persists one immutable trace row per orchestration step.
///
/// A (task_id, step_number) collision is retried exactly once at the next
/// step number; a second collision propagates, since two retries in a row
/// means some other writer owns this task's step sequence.
pub struct TraceWriter {
    traces: Arc<dyn TraceRepository>,
}

impl TraceWriter {
    pub fn new(traces: Arc<dyn TraceRepository>) -> Self {
        Self { traces }
    }

    pub async fn write_model_step(
        &self,
        task: &AgentTask,
        step_number: u32,
        context: &Value,
        reply: &ModelReply,
        duration_ms: u64,
    ) -> Result<(), RepositoryError> {
        let trace = AgentTrace {
            id: TraceId::generate(),
            task_id: task.id.clone(),
            step_number,
            kind: TraceKind::Model,
            name: MODEL_STEP_NAME.to_string(),
            input: context.clone(),
            output: serialize_action(reply),
            duration_ms,
            prompt_tokens: reply.prompt_tokens,
            completion_tokens: reply.completion_tokens,
            created_at: Utc::now(),
        };
        self.insert_with_retry(trace).await
    }

    pub async fn write_tool_step(
        &self,
        task: &AgentTask,
        step_number: u32,
        tool_name: &str,
        input: &Value,
        outcome: &ToolOutcome,
    ) -> Result<(), RepositoryError> {
        let output = match (&outcome.output, &outcome.error) {
            (Some(output), _) => output.clone(),
            (None, Some(error)) => json!({"error": error}),
            (None, None) => json!({"error": "unknown error"}),
        };
        let trace = AgentTrace {
            id: TraceId::generate(),
            task_id: task.id.clone(),
            step_number,
            kind: TraceKind::Tool,
            name: tool_name.to_string(),
            input: input.clone(),
            output,
            duration_ms: outcome.duration_ms,
            prompt_tokens: 0,
            completion_tokens: 0,
            created_at: Utc::now(),
        };
        self.insert_with_retry(trace).await
    }

    async fn insert_with_retry(&self, trace: AgentTrace) -> Result<(), RepositoryError> {
        match self.traces.insert(&trace).await {
            Err(error) if error.is_conflict() => {
                let retried = AgentTrace {
                    id: TraceId::generate(),
                    step_number: trace.step_number + 1,
                    ..trace
                };
                tracing::warn!(
                    task_id = %retried.task_id,
                    step_number = retried.step_number,
                    "trace step collision, retrying at the next step"
                );
                self.traces.insert(&retried).await
            }
            other => other,
        }
    }
}

fn serialize_action(reply: &ModelReply) -> Value {
    let mut output = match &reply.action {
        ModelAction::UseTool { name, input } => {
            json!({"action": "use_tool", "tool": name, "input": input})
        }
        ModelAction::FinalAnswer { result } => {
            json!({"action": "final_answer", "result": result})
        }
        ModelAction::Unknown => json!({"action": "unknown"}),
    };
    if let Some(rationale) = &reply.rationale {
        output["rationale"] = Value::String(rationale.clone());
    }
    output
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use taskrun_core::domain::agent::AgentId;
    use taskrun_core::domain::task::AgentTask;
    use taskrun_core::domain::trace::TraceKind;
    use taskrun_db::repositories::{InMemoryTraceRepository, TraceRepository};

    use super::TraceWriter;
    use crate::model::ModelReply;
    use crate::tools::ToolOutcome;

    fn task() -> AgentTask {
        AgentTask::new(AgentId("agent-1".to_string()), json!({"q": "hi"}))
    }

    #[tokio::test]
    async fn model_and_tool_steps_round_trip() {
        let repo = Arc::new(InMemoryTraceRepository::default());
        let writer = TraceWriter::new(repo.clone());
        let task = task();

        let reply = ModelReply::use_tool("web.search", json!({"query": "hi"}))
            .with_tokens(40, 8)
            .with_rationale("needs a search");
        writer.write_model_step(&task, 1, &json!({"input": {"q": "hi"}}), &reply, 12).await
            .expect("model step");

        let outcome = ToolOutcome::ok(json!({"total": 1}));
        writer
            .write_tool_step(&task, 2, "web.search", &json!({"query": "hi"}), &outcome)
            .await
            .expect("tool step");

        let traces = repo.list_for_task(&task.id).await.expect("list");
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].kind, TraceKind::Model);
        assert_eq!(traces[0].output["action"], "use_tool");
        assert_eq!(traces[0].output["rationale"], "needs a search");
        assert_eq!(traces[0].prompt_tokens, 40);
        assert_eq!(traces[1].kind, TraceKind::Tool);
        assert_eq!(traces[1].name, "web.search");
        assert_eq!(traces[1].output, json!({"total": 1}));
    }

    #[tokio::test]
    async fn failed_tool_steps_record_the_error() {
        let repo = Arc::new(InMemoryTraceRepository::default());
        let writer = TraceWriter::new(repo.clone());
        let task = task();

        let outcome = ToolOutcome::fail("query is required");
        writer
            .write_tool_step(&task, 2, "web.search", &json!({}), &outcome)
            .await
            .expect("tool step");

        let traces = repo.list_for_task(&task.id).await.expect("list");
        assert_eq!(traces[0].output, json!({"error": "query is required"}));
    }

    #[tokio::test]
    async fn step_collision_is_retried_once_at_the_next_step() {
        let repo = Arc::new(InMemoryTraceRepository::default());
        let writer = TraceWriter::new(repo.clone());
        let task = task();

        let reply = ModelReply::final_answer(json!({"done": true}));
        writer.write_model_step(&task, 1, &json!({}), &reply, 1).await.expect("first");
        writer.write_model_step(&task, 1, &json!({}), &reply, 1).await.expect("retried at 2");

        let traces = repo.list_for_task(&task.id).await.expect("list");
        let steps: Vec<u32> = traces.iter().map(|trace| trace.step_number).collect();
        assert_eq!(steps, vec![1, 2]);

        // Steps 1 and 2 are now both taken; a third write at 1 has no free slot.
        let error = writer
            .write_model_step(&task, 1, &json!({}), &reply, 1)
            .await
            .expect_err("second collision propagates");
        assert!(error.is_conflict());
    }
}
