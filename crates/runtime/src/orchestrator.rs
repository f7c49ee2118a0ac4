//! The bounded step loop that drives one Running task to a terminal status.
//!
//! Each iteration reserves two step numbers: the model decision is traced at
//! the current step and a tool invocation (if any) at the next, so the next
//! iteration starts two steps later. Cancellation is polled at the top of
//! every iteration.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};

use taskrun_core::domain::agent::AgentConfig;
use taskrun_core::domain::task::AgentTask;
use taskrun_core::domain::trace::MISSING_TOOL_NAME;
use taskrun_core::metrics::Metrics;
use taskrun_core::pricing::{fallback_token_estimate, PricingTable};
use taskrun_db::repositories::TaskRepository;

use crate::cancel::CancellationRegistry;
use crate::model::{ModelAction, ModelAdapter, ModelRequest};
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry};
use crate::trace::TraceWriter;

pub struct Orchestrator {
    tasks: Arc<dyn TaskRepository>,
    traces: TraceWriter,
    registry: Arc<ToolRegistry>,
    model: Arc<dyn ModelAdapter>,
    cancellations: CancellationRegistry,
    pricing: PricingTable,
    metrics: Metrics,
}

impl Orchestrator {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        traces: TraceWriter,
        registry: Arc<ToolRegistry>,
        model: Arc<dyn ModelAdapter>,
        cancellations: CancellationRegistry,
        pricing: PricingTable,
        metrics: Metrics,
    ) -> Self {
        Self { tasks, traces, registry, model, cancellations, pricing, metrics }
    }

    /// Drives a task that is already Running. Model adapter errors propagate
    /// to the caller (the worker decides whether to retry); every other
    /// outcome commits a terminal status before returning.
    pub async fn run(&self, mut task: AgentTask, agent: &AgentConfig) -> anyhow::Result<()> {
        let mut step: u32 = 1;
        let mut scratchpad: Vec<Value> = Vec::new();
        let mut last_tool: Option<Value> = None;

        while step <= agent.max_steps {
            if self.cancellations.is_cancel_requested(&task.id) {
                self.cancellations.try_clear(&task.id);
                task.mark_canceled(Utc::now())?;
                self.commit(&task).await?;
                tracing::info!(task_id = %task.id, step, "task canceled mid-run");
                return Ok(());
            }

            let mut context = json!({
                "input": task.input,
                "scratchpad": scratchpad,
            });
            if let Some(last) = &last_tool {
                context["last_tool"] = last.clone();
            }

            let request = ModelRequest {
                system_prompt: &agent.system_prompt,
                model: &agent.model,
                temperature: agent.temperature,
                context: &context,
            };
            let started = Instant::now();
            let mut reply = self.model.decide(request).await?;
            let model_duration_ms = started.elapsed().as_millis() as u64;

            // Adapters that report no usage still get accounted for; each
            // counter is estimated independently so a partial report never
            // leaves the other side at zero.
            if reply.prompt_tokens == 0 {
                reply.prompt_tokens = fallback_token_estimate(&context.to_string());
            }
            if reply.completion_tokens == 0 {
                reply.completion_tokens = fallback_token_estimate(&action_text(&reply.action));
            }
            task.add_tokens(reply.prompt_tokens, reply.completion_tokens);
            self.metrics.model_tokens(reply.prompt_tokens, reply.completion_tokens);
            if let Some(cost) =
                self.pricing.try_cost(&agent.model, reply.prompt_tokens, reply.completion_tokens)
            {
                task.add_cost(cost);
            }
            self.tasks.save(&task).await?;

            match reply.action.clone() {
                ModelAction::FinalAnswer { result } => {
                    task.mark_succeeded(result, Utc::now())?;
                    self.commit(&task).await?;
                    tracing::info!(task_id = %task.id, step, "task succeeded");
                    return Ok(());
                }
                ModelAction::UseTool { name, input } => {
                    self.traces
                        .write_model_step(&task, step, &context, &reply, model_duration_ms)
                        .await?;
                    let tool_step = step + 1;

                    if name.trim().is_empty() {
                        return self
                            .fail_tool_request(
                                task,
                                tool_step,
                                MISSING_TOOL_NAME,
                                &input,
                                "Tool name is required".to_string(),
                            )
                            .await;
                    }
                    if !agent.allows_tool(&name) {
                        return self
                            .fail_tool_request(
                                task,
                                tool_step,
                                &name,
                                &input,
                                format!("Tool not allowed: {name}"),
                            )
                            .await;
                    }
                    let Some(tool) = self.registry.resolve(&name) else {
                        return self
                            .fail_tool_request(
                                task,
                                tool_step,
                                &name,
                                &input,
                                format!("Tool not found: {name}"),
                            )
                            .await;
                    };

                    let ctx = ToolContext {
                        task_id: task.id.clone(),
                        step_number: tool_step,
                        tenant: task.tenant.clone(),
                        requested_by: task.requested_by.clone(),
                    };
                    let outcome = self.registry.invoke(tool, &input, &ctx).await;
                    self.metrics.tool_invoked(&name, outcome.duration_ms, outcome.success);
                    self.traces
                        .write_tool_step(&task, tool_step, &name, &input, &outcome)
                        .await?;

                    // Failures are fed back to the model, not escalated.
                    let tool_result = match (&outcome.output, &outcome.error) {
                        (Some(output), _) => output.clone(),
                        (None, Some(error)) => json!({"error": error}),
                        (None, None) => json!({"error": "unknown error"}),
                    };
                    let entry = json!({"tool": name, "output": tool_result});
                    scratchpad.push(entry.clone());
                    last_tool = Some(entry);
                    step += 2;
                }
                ModelAction::Unknown => {
                    self.traces
                        .write_model_step(&task, step, &context, &reply, model_duration_ms)
                        .await?;
                    task.mark_failed("Unknown model action", Utc::now())?;
                    self.commit(&task).await?;
                    tracing::warn!(task_id = %task.id, step, "unknown model action");
                    return Ok(());
                }
            }
        }

        task.mark_failed("MaxSteps exceeded", Utc::now())?;
        self.commit(&task).await?;
        tracing::warn!(task_id = %task.id, max_steps = agent.max_steps, "step budget exhausted");
        Ok(())
    }

    /// Records a tool-step trace describing why the request was refused,
    /// then fails the task with the same message.
    async fn fail_tool_request(
        &self,
        mut task: AgentTask,
        step_number: u32,
        tool_name: &str,
        input: &Value,
        message: String,
    ) -> anyhow::Result<()> {
        let outcome = ToolOutcome::fail(message.clone());
        self.traces
            .write_tool_step(&task, step_number, tool_name, input, &outcome)
            .await?;
        task.mark_failed(&message, Utc::now())?;
        self.commit(&task).await?;
        tracing::warn!(task_id = %task.id, tool = tool_name, %message, "tool request refused");
        Ok(())
    }

    /// Persists a terminal task and emits the completion metrics.
    async fn commit(&self, task: &AgentTask) -> anyhow::Result<()> {
        self.tasks.save(task).await?;
        let duration_ms = task
            .finished_at
            .map(|finished| (finished - task.created_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.metrics.task_completed(task.status, duration_ms);
        Ok(())
    }
}

fn action_text(action: &ModelAction) -> String {
    match action {
        ModelAction::UseTool { name, input } => format!("{name} {input}"),
        ModelAction::FinalAnswer { result } => result.to_string(),
        ModelAction::Unknown => "unknown".to_string(),
    }
}
