//! Model adapter seam.
//!
//! The orchestrator never talks to a model provider directly; it hands a
//! request to a [`ModelAdapter`] and interprets the returned action. The
//! scripted and echo adapters below back tests and the smoke command.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

/// One decision request for the current step.
#[derive(Clone, Debug)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub model: &'a str,
    pub temperature: f64,
    /// Task input plus the scratchpad of prior tool results.
    pub context: &'a Value,
}

/// What the model asked the orchestrator to do next.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelAction {
    UseTool { name: String, input: Value },
    FinalAnswer { result: Value },
    /// Anything the adapter could not map onto the two actions above.
    Unknown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelReply {
    pub action: ModelAction,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Free-form reasoning text, recorded on the model trace.
    pub rationale: Option<String>,
}

impl ModelReply {
    pub fn final_answer(result: Value) -> Self {
        Self {
            action: ModelAction::FinalAnswer { result },
            prompt_tokens: 0,
            completion_tokens: 0,
            rationale: None,
        }
    }

    pub fn use_tool(name: impl Into<String>, input: Value) -> Self {
        Self {
            action: ModelAction::UseTool { name: name.into(), input },
            prompt_tokens: 0,
            completion_tokens: 0,
            rationale: None,
        }
    }

    pub fn with_tokens(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn decide(&self, request: ModelRequest<'_>) -> anyhow::Result<ModelReply>;
}

/// Replays a fixed script of replies, then falls back to a configured reply
/// or `Unknown`. Deterministic driver for tests and the smoke run.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<ModelReply>>,
    fallback: Option<ModelReply>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self { script: Mutex::new(replies.into_iter().collect()), fallback: None }
    }

    /// Returns the same reply on every call, with an empty script.
    pub fn always(reply: ModelReply) -> Self {
        Self { script: Mutex::new(VecDeque::new()), fallback: Some(reply) }
    }
}

#[async_trait]
impl ModelAdapter for ScriptedModel {
    async fn decide(&self, _request: ModelRequest<'_>) -> anyhow::Result<ModelReply> {
        let scripted = self.script.lock().ok().and_then(|mut script| script.pop_front());
        Ok(scripted.or_else(|| self.fallback.clone()).unwrap_or(ModelReply {
            action: ModelAction::Unknown,
            prompt_tokens: 0,
            completion_tokens: 0,
            rationale: None,
        }))
    }
}

/// Answers immediately by echoing the task input.
pub struct EchoModel;

#[async_trait]
impl ModelAdapter for EchoModel {
    async fn decide(&self, request: ModelRequest<'_>) -> anyhow::Result<ModelReply> {
        let input = request.context.get("input").cloned().unwrap_or(Value::Null);
        Ok(ModelReply::final_answer(json!({"echo": input}))
            .with_rationale("echoing the task input"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{EchoModel, ModelAction, ModelAdapter, ModelReply, ModelRequest, ScriptedModel};

    fn request(context: &serde_json::Value) -> ModelRequest<'_> {
        ModelRequest {
            system_prompt: "You are a test assistant.",
            model: "scripted",
            temperature: 0.0,
            context,
        }
    }

    #[tokio::test]
    async fn scripted_replies_play_in_order_then_go_unknown() {
        let model = ScriptedModel::new([
            ModelReply::use_tool("web.search", json!({"query": "x"})),
            ModelReply::final_answer(json!({"done": true})),
        ]);
        let context = json!({});

        let first = model.decide(request(&context)).await.expect("reply");
        assert!(matches!(first.action, ModelAction::UseTool { .. }));

        let second = model.decide(request(&context)).await.expect("reply");
        assert!(matches!(second.action, ModelAction::FinalAnswer { .. }));

        let exhausted = model.decide(request(&context)).await.expect("reply");
        assert_eq!(exhausted.action, ModelAction::Unknown);
    }

    #[tokio::test]
    async fn always_repeats_the_fallback_reply() {
        let model = ScriptedModel::always(ModelReply::use_tool("web.search", json!({})));
        let context = json!({});
        for _ in 0..3 {
            let reply = model.decide(request(&context)).await.expect("reply");
            assert!(matches!(reply.action, ModelAction::UseTool { .. }));
        }
    }

    #[tokio::test]
    async fn echo_model_answers_with_the_input() {
        let context = json!({"input": {"q": "hello"}});
        let reply = EchoModel.decide(request(&context)).await.expect("reply");
        assert_eq!(
            reply.action,
            ModelAction::FinalAnswer { result: json!({"echo": {"q": "hello"}}) }
        );
    }
}
