use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolOutcome};

/// Read-only query tool over in-memory fixture tables.
///
/// Only a constrained grammar is accepted:
/// `SELECT <cols|*> FROM <fixture> [WHERE id = '<value>']`. Anything else
/// is rejected with a typed error so the model gets actionable feedback
/// instead of a crash.
pub struct DbQueryTool {
    fixtures: HashMap<String, Vec<Value>>,
    grammar: Regex,
}

const GRAMMAR: &str = r"(?i)^\s*select\s+(\*|[a-z_][a-z0-9_]*(?:\s*,\s*[a-z_][a-z0-9_]*)*)\s+from\s+([a-z_][a-z0-9_]*)(?:\s+where\s+id\s*=\s*'([^']*)')?\s*;?\s*$";

impl Default for DbQueryTool {
    fn default() -> Self {
        let mut fixtures = HashMap::new();
        fixtures.insert(
            "customers".to_string(),
            vec![
                json!({"id": "c-1", "name": "Acme Corp", "tier": "enterprise"}),
                json!({"id": "c-2", "name": "Globex", "tier": "starter"}),
                json!({"id": "c-3", "name": "Initech", "tier": "premium"}),
            ],
        );
        fixtures.insert(
            "orders".to_string(),
            vec![
                json!({"id": "o-1", "customer_id": "c-1", "total": 1250}),
                json!({"id": "o-2", "customer_id": "c-2", "total": 90}),
            ],
        );
        Self::with_fixtures(fixtures)
    }
}

impl DbQueryTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixtures(fixtures: HashMap<String, Vec<Value>>) -> Self {
        // The pattern is a compile-time constant; a failure here is a
        // programming error caught by the constructor tests.
        let grammar = Regex::new(GRAMMAR).expect("query grammar must compile");
        Self { fixtures, grammar }
    }
}

#[async_trait]
impl Tool for DbQueryTool {
    fn name(&self) -> &str {
        "db.query"
    }

    async fn run(&self, input: &Value, _ctx: &ToolContext) -> ToolOutcome {
        let Some(query) = input.get("query").and_then(Value::as_str) else {
            return ToolOutcome::fail("query is required");
        };

        let Some(captures) = self.grammar.captures(query) else {
            return ToolOutcome::fail(
                "unsupported query; expected SELECT <columns|*> FROM <fixture> \
                 [WHERE id = '<value>']",
            );
        };

        let columns = captures.get(1).map(|m| m.as_str()).unwrap_or("*");
        let table = captures.get(2).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
        let id_filter = captures.get(3).map(|m| m.as_str());

        let Some(rows) = self.fixtures.get(&table) else {
            return ToolOutcome::fail(format!("unknown fixture table: {table}"));
        };

        let selected = rows
            .iter()
            .filter(|row| match id_filter {
                Some(id) => row.get("id").and_then(Value::as_str) == Some(id),
                None => true,
            })
            .map(|row| project_columns(row, columns))
            .collect::<Result<Vec<_>, _>>();

        match selected {
            Ok(rows) => ToolOutcome::ok(json!({"count": rows.len(), "rows": rows})),
            Err(unknown_column) => {
                ToolOutcome::fail(format!("unknown column in projection: {unknown_column}"))
            }
        }
    }
}

fn project_columns(row: &Value, columns: &str) -> Result<Value, String> {
    if columns.trim() == "*" {
        return Ok(row.clone());
    }

    let mut projected = serde_json::Map::new();
    for column in columns.split(',') {
        let column = column.trim().to_ascii_lowercase();
        match row.get(&column) {
            Some(value) => {
                projected.insert(column, value.clone());
            }
            None => return Err(column),
        }
    }
    Ok(Value::Object(projected))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use taskrun_core::domain::task::TaskId;

    use super::DbQueryTool;
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
    async fn select_star_returns_all_rows() {
        let tool = DbQueryTool::new();
        let outcome = tool.run(&json!({"query": "SELECT * FROM customers"}), &ctx()).await;

        assert!(outcome.success);
        assert_eq!(outcome.output.expect("output")["count"], 3);
    }

    #[tokio::test]
    async fn where_id_filters_to_one_row() {
        let tool = DbQueryTool::new();
        let outcome = tool
            .run(&json!({"query": "select name, tier from customers where id = 'c-2'"}), &ctx())
            .await;

        assert!(outcome.success);
        let output = outcome.output.expect("output");
        assert_eq!(output["count"], 1);
        assert_eq!(output["rows"][0], json!({"name": "Globex", "tier": "starter"}));
    }

    #[tokio::test]
    async fn anything_outside_the_grammar_is_rejected() {
        let tool = DbQueryTool::new();
        for query in [
            "DROP TABLE customers",
            "SELECT * FROM customers; DELETE FROM orders",
            "SELECT * FROM customers WHERE name = 'Acme Corp'",
            "INSERT INTO customers VALUES ('x')",
            "SELECT * FROM customers UNION SELECT * FROM orders",
        ] {
            let outcome = tool.run(&json!({"query": query}), &ctx()).await;
            assert!(!outcome.success, "query should be rejected: {query}");
            assert!(outcome.error.expect("error").contains("unsupported query"));
        }
    }

    #[tokio::test]
    async fn unknown_table_is_a_typed_error() {
        let tool = DbQueryTool::new();
        let outcome = tool.run(&json!({"query": "SELECT * FROM secrets"}), &ctx()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("unknown fixture table: secrets"));
    }

    #[tokio::test]
    async fn unknown_column_is_a_typed_error() {
        let tool = DbQueryTool::new();
        let outcome =
            tool.run(&json!({"query": "SELECT password FROM customers"}), &ctx()).await;
        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("unknown column"));
    }
}
