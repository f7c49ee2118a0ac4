use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "agent_config",
        "agent_task",
        "agent_trace",
        "idx_agent_task_status",
        "idx_agent_task_created_at",
        "idx_agent_trace_task_id",
    ];

    #[tokio::test]
    async fn migrations_create_baseline_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master \
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{object}` after migrations");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn trace_step_numbers_are_unique_per_task() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO agent_task (id, agent_id, input_json, status, created_at)
             VALUES ('t-1', 'a-1', '{}', 'running', '2026-08-23T12:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert task");

        let insert_trace = "INSERT INTO agent_trace \
             (id, task_id, step_number, kind, name, input_json, output_json, duration_ms, created_at) \
             VALUES (?, 't-1', 1, 'model', 'model', '{}', '{}', 0, '2026-08-23T12:00:01Z')";

        sqlx::query(insert_trace).bind("tr-1").execute(&pool).await.expect("first insert");
        let duplicate = sqlx::query(insert_trace).bind("tr-2").execute(&pool).await;
        assert!(duplicate.is_err(), "duplicate (task_id, step_number) must be rejected");

        pool.close().await;
    }
}
