use sqlx::{sqlite::SqliteRow, Row};

use taskrun_core::domain::agent::{AgentConfig, AgentId};

use super::task::{parse_timestamp, parse_u64};
use super::{AgentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentConfig>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                system_prompt,
                tool_allowlist_json,
                model,
                temperature,
                max_steps,
                is_enabled,
                created_at,
                updated_at
             FROM agent_config
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(agent_from_row).transpose()
    }

    async fn save(&self, agent: &AgentConfig) -> Result<(), RepositoryError> {
        let allowlist = serde_json::to_string(&agent.tool_allowlist).map_err(|error| {
            RepositoryError::Decode(format!("could not encode tool allowlist: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO agent_config (
                id,
                system_prompt,
                tool_allowlist_json,
                model,
                temperature,
                max_steps,
                is_enabled,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                system_prompt = excluded.system_prompt,
                tool_allowlist_json = excluded.tool_allowlist_json,
                model = excluded.model,
                temperature = excluded.temperature,
                max_steps = excluded.max_steps,
                is_enabled = excluded.is_enabled,
                updated_at = excluded.updated_at",
        )
        .bind(&agent.id.0)
        .bind(&agent.system_prompt)
        .bind(allowlist)
        .bind(&agent.model)
        .bind(agent.temperature)
        .bind(i64::from(agent.max_steps))
        .bind(agent.is_enabled)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn agent_from_row(row: SqliteRow) -> Result<AgentConfig, RepositoryError> {
    let allowlist_raw = row.try_get::<String, _>("tool_allowlist_json")?;
    let tool_allowlist = serde_json::from_str(&allowlist_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid tool allowlist JSON: {error}"))
    })?;

    Ok(AgentConfig {
        id: AgentId(row.try_get("id")?),
        system_prompt: row.try_get("system_prompt")?,
        tool_allowlist,
        model: row.try_get("model")?,
        temperature: row.try_get("temperature")?,
        max_steps: parse_u64("max_steps", row.try_get("max_steps")?)? as u32,
        is_enabled: row.try_get("is_enabled")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use taskrun_core::chrono::{DateTime, Utc};
    use taskrun_core::domain::agent::{AgentConfig, AgentId};

    use super::SqlAgentRepository;
    use crate::migrations;
    use crate::repositories::AgentRepository;
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

    fn sample_agent() -> AgentConfig {
        AgentConfig {
            id: AgentId("agent-research".to_string()),
            system_prompt: "You answer questions using the available tools.".to_string(),
            tool_allowlist: vec!["web.search".to_string(), "db.query".to_string()],
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_steps: 10,
            is_enabled: true,
            created_at: parse_ts("2026-08-23T11:00:00Z"),
            updated_at: parse_ts("2026-08-23T11:00:00Z"),
        }
    }

    #[tokio::test]
    async fn sql_agent_repo_round_trips_and_updates() {
        let pool = setup_pool().await;
        let repo = SqlAgentRepository::new(pool.clone());

        let agent = sample_agent();
        repo.save(&agent).await.expect("save agent");

        let found = repo.find_by_id(&agent.id).await.expect("find agent");
        assert_eq!(found, Some(agent.clone()));

        let mut updated = agent;
        updated.is_enabled = false;
        updated.max_steps = 3;
        updated.updated_at = parse_ts("2026-08-23T12:00:00Z");
        repo.save(&updated).await.expect("update agent");

        let found = repo.find_by_id(&updated.id).await.expect("find updated");
        assert_eq!(found, Some(updated));

        pool.close().await;
    }
}
