use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use taskrun_core::chrono::{DateTime, Utc};
use taskrun_core::domain::agent::AgentId;
use taskrun_core::domain::task::{AgentTask, GuardrailDecision, TaskId, TaskStatus};

use super::{RepositoryError, TaskRepository};
use crate::DbPool;

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<AgentTask>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                agent_id,
                input_json,
                status,
                result_json,
                error_message,
                tenant,
                requested_by,
                guardrail_decision,
                guardrail_metadata_json,
                prompt_tokens,
                completion_tokens,
                estimated_cost,
                created_at,
                started_at,
                finished_at
             FROM agent_task
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }

    async fn save(&self, task: &AgentTask) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO agent_task (
                id,
                agent_id,
                input_json,
                status,
                result_json,
                error_message,
                tenant,
                requested_by,
                guardrail_decision,
                guardrail_metadata_json,
                prompt_tokens,
                completion_tokens,
                estimated_cost,
                created_at,
                started_at,
                finished_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                input_json = excluded.input_json,
                status = excluded.status,
                result_json = excluded.result_json,
                error_message = excluded.error_message,
                tenant = excluded.tenant,
                requested_by = excluded.requested_by,
                guardrail_decision = excluded.guardrail_decision,
                guardrail_metadata_json = excluded.guardrail_metadata_json,
                prompt_tokens = excluded.prompt_tokens,
                completion_tokens = excluded.completion_tokens,
                estimated_cost = excluded.estimated_cost,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at",
        )
        .bind(&task.id.0)
        .bind(&task.agent_id.0)
        .bind(task.input.to_string())
        .bind(task.status.as_str())
        .bind(task.result.as_ref().map(|value| value.to_string()))
        .bind(task.error_message.as_deref())
        .bind(task.tenant.as_deref())
        .bind(task.requested_by.as_deref())
        .bind(task.guardrail_decision.map(|decision| decision.as_str()))
        .bind(task.guardrail_metadata.as_ref().map(|value| value.to_string()))
        .bind(to_i64("prompt_tokens", task.prompt_tokens)?)
        .bind(to_i64("completion_tokens", task.completion_tokens)?)
        .bind(task.estimated_cost.map(|cost| cost.to_string()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.started_at.map(|value| value.to_rfc3339()))
        .bind(task.finished_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn task_from_row(row: SqliteRow) -> Result<AgentTask, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    let guardrail_decision = row
        .try_get::<Option<String>, _>("guardrail_decision")?
        .map(|value| {
            GuardrailDecision::parse(&value).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown guardrail decision `{value}`"))
            })
        })
        .transpose()?;

    Ok(AgentTask {
        id: TaskId(row.try_get("id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        input: parse_json("input_json", row.try_get("input_json")?)?,
        status,
        result: parse_optional_json("result_json", row.try_get("result_json")?)?,
        error_message: row.try_get("error_message")?,
        tenant: row.try_get("tenant")?,
        requested_by: row.try_get("requested_by")?,
        guardrail_decision,
        guardrail_metadata: parse_optional_json(
            "guardrail_metadata_json",
            row.try_get("guardrail_metadata_json")?,
        )?,
        prompt_tokens: parse_u64("prompt_tokens", row.try_get("prompt_tokens")?)?,
        completion_tokens: parse_u64("completion_tokens", row.try_get("completion_tokens")?)?,
        estimated_cost: parse_optional_decimal(
            "estimated_cost",
            row.try_get("estimated_cost")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
    })
}

pub(crate) fn to_i64(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("value for `{column}` exceeds the storable range: {value}"))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative): {value}"
        ))
    })
}

pub(crate) fn parse_json(
    column: &str,
    value: String,
) -> Result<serde_json::Value, RepositoryError> {
    serde_json::from_str(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid JSON in `{column}`: {error}")))
}

fn parse_optional_json(
    column: &str,
    value: Option<String>,
) -> Result<Option<serde_json::Value>, RepositoryError> {
    value.map(|raw| parse_json(column, raw)).transpose()
}

fn parse_optional_decimal(
    column: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid decimal in `{column}`: `{raw}` ({error})"))
            })
        })
        .transpose()
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use taskrun_core::chrono::{DateTime, Utc};
    use taskrun_core::domain::agent::AgentId;
    use taskrun_core::domain::task::{AgentTask, GuardrailDecision, TaskId, TaskStatus};

    use super::SqlTaskRepository;
    use crate::migrations;
    use crate::repositories::TaskRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn sample_task() -> AgentTask {
        AgentTask {
            id: TaskId("task-001".to_string()),
            agent_id: AgentId("agent-research".to_string()),
            input: json!({"question": "what is taskrun?"}),
            status: TaskStatus::Pending,
            result: None,
            error_message: None,
            tenant: Some("acme".to_string()),
            requested_by: Some("user-7".to_string()),
            guardrail_decision: Some(GuardrailDecision::Allow),
            guardrail_metadata: Some(json!({"policy": "default"})),
            prompt_tokens: 0,
            completion_tokens: 0,
            estimated_cost: None,
            created_at: parse_ts("2026-08-23T12:00:00Z"),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn sql_task_repo_round_trips_full_record() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());

        let task = sample_task();
        repo.save(&task).await.expect("save task");

        let found = repo.find_by_id(&task.id).await.expect("find task");
        assert_eq!(found, Some(task));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_task_repo_upserts_terminal_fields() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());

        let mut task = sample_task();
        repo.save(&task).await.expect("save pending");

        task.mark_running(parse_ts("2026-08-23T12:00:01Z")).expect("running");
        task.add_tokens(128, 32);
        task.add_cost(Decimal::new(42, 4));
        task.mark_succeeded(json!({"answer": "a runtime"}), parse_ts("2026-08-23T12:00:05Z"))
            .expect("succeeded");
        repo.save(&task).await.expect("save terminal");

        let found = repo.find_by_id(&task.id).await.expect("find task").expect("present");
        assert_eq!(found.status, TaskStatus::Succeeded);
        assert_eq!(found.result, Some(json!({"answer": "a runtime"})));
        assert_eq!(found.prompt_tokens, 128);
        assert_eq!(found.completion_tokens, 32);
        assert_eq!(found.estimated_cost, Some(Decimal::new(42, 4)));
        assert_eq!(found.started_at, Some(parse_ts("2026-08-23T12:00:01Z")));
        assert_eq!(found.finished_at, Some(parse_ts("2026-08-23T12:00:05Z")));

        pool.close().await;
    }

    #[tokio::test]
    async fn missing_task_resolves_to_none() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());

        let found = repo.find_by_id(&TaskId("nope".to_string())).await.expect("query");
        assert_eq!(found, None);

        pool.close().await;
    }
}
