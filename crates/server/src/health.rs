use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use taskrun_db::DbPool;

use crate::api::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "taskrun-server runtime initialized".to_string(),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Json;
    use chrono::Utc;

    use taskrun_core::domain::agent::{AgentConfig, AgentId};
    use taskrun_core::metrics::Metrics;
    use taskrun_db::connect_with_settings;
    use taskrun_db::repositories::{
        InMemoryAgentRepository, InMemoryTaskRepository, InMemoryTraceRepository,
    };
    use taskrun_runtime::{CancellationRegistry, TaskQueue, TaskService};

    use crate::api::AppState;
    use crate::health::health;

    async fn state(db_url: &str) -> AppState {
        let (queue, receiver) = TaskQueue::unbounded();
        std::mem::forget(receiver);
        let agent = AgentConfig {
            id: AgentId("researcher".to_string()),
            system_prompt: "assistant".to_string(),
            tool_allowlist: vec![],
            model: "scripted".to_string(),
            temperature: 0.0,
            max_steps: 8,
            is_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let service = TaskService::new(
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(InMemoryTraceRepository::new()),
            Arc::new(InMemoryAgentRepository::with_agents([agent])),
            queue,
            CancellationRegistry::new(),
            Metrics::new(),
        );
        let db_pool = connect_with_settings(db_url, 1, 5).await.expect("pool");
        AppState { service: Arc::new(service), db_pool }
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let state = state("sqlite::memory:?cache=shared").await;

        let (status, Json(payload)) = health(State(state.clone())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let state = state("sqlite::memory:?cache=shared").await;
        state.db_pool.close().await;

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
