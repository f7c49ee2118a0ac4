use sqlx::{sqlite::SqliteRow, Row};

use taskrun_core::domain::task::TaskId;
use taskrun_core::domain::trace::{AgentTrace, TraceId, TraceKind};

use super::task::{parse_json, parse_timestamp, parse_u64, to_i64};
use super::{RepositoryError, TraceRepository};
use crate::DbPool;

pub struct SqlTraceRepository {
    pool: DbPool,
}

impl SqlTraceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TraceRepository for SqlTraceRepository {
    async fn insert(&self, trace: &AgentTrace) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO agent_trace (
                id,
                task_id,
                step_number,
                kind,
                name,
                input_json,
                output_json,
                duration_ms,
                prompt_tokens,
                completion_tokens,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trace.id.0)
        .bind(&trace.task_id.0)
        .bind(i64::from(trace.step_number))
        .bind(trace.kind.as_str())
        .bind(&trace.name)
        .bind(trace.input.to_string())
        .bind(trace.output.to_string())
        .bind(to_i64("duration_ms", trace.duration_ms)?)
        .bind(to_i64("prompt_tokens", trace.prompt_tokens)?)
        .bind(to_i64("completion_tokens", trace.completion_tokens)?)
        .bind(trace.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict(format!(
                "trace step {} already exists for task {}",
                trace.step_number, trace.task_id
            ))),
            Err(error) => Err(error.into()),
        }
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<AgentTrace>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                task_id,
                step_number,
                kind,
                name,
                input_json,
                output_json,
                duration_ms,
                prompt_tokens,
                completion_tokens,
                created_at
             FROM agent_trace
             WHERE task_id = ?
             ORDER BY step_number ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trace_from_row).collect()
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
        .unwrap_or(false)
}

fn trace_from_row(row: SqliteRow) -> Result<AgentTrace, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = TraceKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown trace kind `{kind_raw}`")))?;

    let step_number = row.try_get::<i64, _>("step_number")?;
    let step_number = u32::try_from(step_number).map_err(|_| {
        RepositoryError::Decode(format!("invalid step_number (expected positive): {step_number}"))
    })?;

    Ok(AgentTrace {
        id: TraceId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        step_number,
        kind,
        name: row.try_get("name")?,
        input: parse_json("input_json", row.try_get("input_json")?)?,
        output: parse_json("output_json", row.try_get("output_json")?)?,
        duration_ms: parse_u64("duration_ms", row.try_get("duration_ms")?)?,
        prompt_tokens: parse_u64("prompt_tokens", row.try_get("prompt_tokens")?)?,
        completion_tokens: parse_u64("completion_tokens", row.try_get("completion_tokens")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use taskrun_core::chrono::{DateTime, Utc};
    use taskrun_core::domain::task::TaskId;
    use taskrun_core::domain::trace::{AgentTrace, TraceId, TraceKind};

    use super::SqlTraceRepository;
    use crate::migrations;
    use crate::repositories::TraceRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn insert_task(pool: &DbPool, task_id: &TaskId) {
        sqlx::query(
            "INSERT INTO agent_task (id, agent_id, input_json, status, created_at)
             VALUES (?, 'agent-1', '{}', 'running', '2026-08-23T12:00:00Z')",
        )
        .bind(&task_id.0)
        .execute(pool)
        .await
        .expect("insert task");
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn sample_trace(task_id: &TaskId, step_number: u32) -> AgentTrace {
        AgentTrace {
            id: TraceId::generate(),
            task_id: task_id.clone(),
            step_number,
            kind: TraceKind::Model,
            name: "model".to_string(),
            input: json!({"context": "hello"}),
            output: json!({"action": "final_answer"}),
            duration_ms: 12,
            prompt_tokens: 20,
            completion_tokens: 5,
            created_at: parse_ts("2026-08-23T12:00:01Z"),
        }
    }

    #[tokio::test]
    async fn traces_round_trip_in_step_order() {
        let pool = setup_pool().await;
        let task_id = TaskId("task-traces".to_string());
        insert_task(&pool, &task_id).await;

        let repo = SqlTraceRepository::new(pool.clone());
        let third = sample_trace(&task_id, 3);
        let first = sample_trace(&task_id, 1);
        repo.insert(&third).await.expect("insert step 3");
        repo.insert(&first).await.expect("insert step 1");

        let listed = repo.list_for_task(&task_id).await.expect("list traces");
        let steps = listed.iter().map(|trace| trace.step_number).collect::<Vec<_>>();
        assert_eq!(steps, vec![1, 3]);
        assert_eq!(listed[0], first);
        assert_eq!(listed[1], third);

        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_step_number_surfaces_as_conflict() {
        let pool = setup_pool().await;
        let task_id = TaskId("task-conflict".to_string());
        insert_task(&pool, &task_id).await;

        let repo = SqlTraceRepository::new(pool.clone());
        repo.insert(&sample_trace(&task_id, 1)).await.expect("first insert");

        let error = repo.insert(&sample_trace(&task_id, 1)).await.expect_err("duplicate step");
        assert!(error.is_conflict(), "expected Conflict, got {error:?}");

        pool.close().await;
    }

    #[tokio::test]
    async fn same_step_number_is_allowed_across_tasks() {
        let pool = setup_pool().await;
        let first_task = TaskId("task-a".to_string());
        let second_task = TaskId("task-b".to_string());
        insert_task(&pool, &first_task).await;
        insert_task(&pool, &second_task).await;

        let repo = SqlTraceRepository::new(pool.clone());
        repo.insert(&sample_trace(&first_task, 1)).await.expect("task a step 1");
        repo.insert(&sample_trace(&second_task, 1)).await.expect("task b step 1");

        pool.close().await;
    }
}
