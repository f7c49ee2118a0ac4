use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolOutcome};

const DEFAULT_LIMIT: usize = 5;

#[derive(Clone, Debug)]
struct SearchDocument {
    title: &'static str,
    url: &'static str,
    snippet: &'static str,
}

/// Fixture-backed search tool. The corpus is deliberately static so runs
/// are reproducible; a production deployment swaps this for a real search
/// backend behind the same `Tool` contract.
pub struct WebSearchTool {
    corpus: Vec<SearchDocument>,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self {
            corpus: vec![
                SearchDocument {
                    title: "Taskrun orchestration runtime",
                    url: "https://docs.example.com/taskrun/runtime",
                    snippet: "A bounded step loop drives agent tasks through model \
                              decisions and sandboxed tool calls.",
                },
                SearchDocument {
                    title: "Cooperative cancellation patterns",
                    url: "https://docs.example.com/taskrun/cancellation",
                    snippet: "Cancellation is polled at loop iteration boundaries, \
                              bounding latency to one step.",
                },
                SearchDocument {
                    title: "Trace auditing for agent tasks",
                    url: "https://docs.example.com/taskrun/traces",
                    snippet: "Every model decision and tool invocation is persisted \
                              as an immutable trace row.",
                },
                SearchDocument {
                    title: "Token accounting and pricing",
                    url: "https://docs.example.com/taskrun/pricing",
                    snippet: "Prompt and completion tokens accumulate per task; cost \
                              estimation is best-effort.",
                },
            ],
        }
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web.search"
    }

    async fn run(&self, input: &Value, _ctx: &ToolContext) -> ToolOutcome {
        let Some(query) = input.get("query").and_then(Value::as_str) else {
            return ToolOutcome::fail("query is required");
        };
        let query = query.trim().to_ascii_lowercase();
        if query.is_empty() {
            return ToolOutcome::fail("query is required");
        }

        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map(|limit| limit as usize)
            .unwrap_or(DEFAULT_LIMIT)
            .max(1);

        let results = self
            .corpus
            .iter()
            .filter(|doc| {
                doc.title.to_ascii_lowercase().contains(&query)
                    || doc.snippet.to_ascii_lowercase().contains(&query)
            })
            .take(limit)
            .map(|doc| json!({"title": doc.title, "url": doc.url, "snippet": doc.snippet}))
            .collect::<Vec<_>>();

        ToolOutcome::ok(json!({"total": results.len(), "results": results}))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use taskrun_core::domain::task::TaskId;

    use super::WebSearchTool;
    use crate::tools::{Tool, ToolContext};

    fn ctx() -> ToolContext {
        ToolContext {
            task_id: TaskId("t-1".to_string()),
            step_number: 2,
            tenant: None,
            requested_by: None,
        }
    }

    #[tokio::test]
    async fn matching_documents_are_returned() {
        let tool = WebSearchTool::new();
        let outcome = tool.run(&json!({"query": "cancellation"}), &ctx()).await;

        assert!(outcome.success);
        let output = outcome.output.expect("output");
        assert_eq!(output["total"], 1);
        assert!(output["results"][0]["title"]
            .as_str()
            .expect("title")
            .contains("cancellation"));
    }

    #[tokio::test]
    async fn limit_caps_the_result_count() {
        let tool = WebSearchTool::new();
        let outcome = tool.run(&json!({"query": "task", "limit": 1}), &ctx()).await;
        assert!(outcome.success);
        assert_eq!(outcome.output.expect("output")["total"], 1);
    }

    #[tokio::test]
    async fn missing_query_fails_without_panicking() {
        let tool = WebSearchTool::new();
        let outcome = tool.run(&json!({}), &ctx()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("query is required"));

        let outcome = tool.run(&json!({"query": "  "}), &ctx()).await;
        assert!(!outcome.success);
    }
}
