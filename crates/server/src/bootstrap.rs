use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use taskrun_core::config::{AppConfig, ConfigError, LoadOptions};
use taskrun_core::metrics::Metrics;
use taskrun_db::repositories::{
    AgentRepository, SqlAgentRepository, SqlTaskRepository, SqlTraceRepository, TaskRepository,
    TraceRepository,
};
use taskrun_db::{connect_with_settings, migrations, DbPool};
use taskrun_runtime::model::{EchoModel, ModelAdapter};
use taskrun_runtime::tools::{DbQueryTool, FileWriteTool, WebSearchTool};
use taskrun_runtime::{
    CancellationRegistry, Orchestrator, TaskQueue, TaskService, ToolRegistry, TraceWriter,
    Worker, WorkerSettings,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<TaskService>,
    pub metrics: Metrics,
    pub shutdown: CancellationToken,
    pub worker: tokio::task::JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

/// Wires storage, tools, the worker, and the task service from configuration.
/// The model adapter defaults to the echo adapter; deployments with a real
/// provider pass their own.
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, Arc::new(EchoModel)).await
}

pub async fn bootstrap_with_config(
    config: AppConfig,
    model: Arc<dyn ModelAdapter>,
) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let tasks: Arc<dyn TaskRepository> = Arc::new(SqlTaskRepository::new(db_pool.clone()));
    let traces: Arc<dyn TraceRepository> = Arc::new(SqlTraceRepository::new(db_pool.clone()));
    let agents: Arc<dyn AgentRepository> = Arc::new(SqlAgentRepository::new(db_pool.clone()));

    let mut registry = ToolRegistry::new();
    registry.register(WebSearchTool::new());
    registry.register(DbQueryTool::new());
    registry
        .register(FileWriteTool::new(config.sandbox.file_root.clone(), config.sandbox.max_file_bytes));

    let (queue, receiver) = match config.worker.queue_capacity {
        Some(capacity) => TaskQueue::bounded(capacity),
        None => TaskQueue::unbounded(),
    };
    let cancellations = CancellationRegistry::new();
    let metrics = Metrics::new();
    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        tasks.clone(),
        TraceWriter::new(traces.clone()),
        Arc::new(registry),
        model,
        cancellations.clone(),
        config.pricing.clone(),
        metrics.clone(),
    ));
    let worker = Worker::new(
        receiver,
        tasks.clone(),
        agents.clone(),
        orchestrator,
        cancellations.clone(),
        shutdown.clone(),
        metrics.clone(),
        WorkerSettings::from_config(&config.worker),
    );
    let worker = tokio::spawn(worker.run());
    info!(event_name = "system.bootstrap.worker_started", "task worker started");

    let service = Arc::new(TaskService::new(
        tasks,
        traces,
        agents,
        queue,
        cancellations,
        metrics.clone(),
    ));

    Ok(Application { config, db_pool, service, metrics, shutdown, worker })
}

#[cfg(test)]
mod tests {
    use taskrun_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_starts_the_worker() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('agent_config', 'agent_task', 'agent_trace')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 3);

        app.shutdown.cancel();
        app.worker.await.expect("worker exits cleanly");
        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_an_unreachable_database_path() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite:///definitely/not/here/tasks.db".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;
        assert!(result.is_err());
    }
}
