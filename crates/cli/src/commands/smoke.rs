use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::commands::CommandResult;
use taskrun_core::config::{AppConfig, LoadOptions};
use taskrun_core::domain::task::TaskStatus;
use taskrun_core::metrics::Metrics;
use taskrun_core::pricing::PricingTable;
use taskrun_db::repositories::{
    InMemoryAgentRepository, InMemoryTaskRepository, InMemoryTraceRepository, TaskRepository,
    TraceRepository,
};
use taskrun_db::{connect_with_settings, migrations};
use taskrun_runtime::model::{ModelReply, ScriptedModel};
use taskrun_runtime::tools::{DbQueryTool, WebSearchTool};
use taskrun_runtime::{
    CancellationRegistry, CreateTaskRequest, Orchestrator, TaskQueue, TaskService, ToolRegistry,
    TraceWriter, Worker, WorkerSettings,
};

use super::seed::demo_agent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("task_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("task_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("task_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });
    runtime.block_on(async {
        pool.close().await;
    });

    match migration_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Fail,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: format!("migration execution failed: {error}"),
        }),
    }

    let round_trip_started = Instant::now();
    let round_trip = runtime.block_on(scripted_round_trip());
    checks.push(match round_trip {
        Ok(message) => SmokeCheck {
            name: "task_round_trip",
            status: SmokeStatus::Pass,
            elapsed_ms: round_trip_started.elapsed().as_millis() as u64,
            message,
        },
        Err(message) => SmokeCheck {
            name: "task_round_trip",
            status: SmokeStatus::Fail,
            elapsed_ms: round_trip_started.elapsed().as_millis() as u64,
            message,
        },
    });

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// Drives one scripted task through the queue, worker, and orchestrator
/// against in-memory storage, so the check is deterministic and leaves no
/// residue in the configured database.
async fn scripted_round_trip() -> Result<String, String> {
    let tasks: Arc<InMemoryTaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let traces: Arc<InMemoryTraceRepository> = Arc::new(InMemoryTraceRepository::new());
    let agents = Arc::new(InMemoryAgentRepository::with_agents([demo_agent()]));

    let mut registry = ToolRegistry::new();
    registry.register(WebSearchTool::new());
    registry.register(DbQueryTool::new());

    let model = Arc::new(ScriptedModel::new([
        ModelReply::use_tool("web.search", json!({"query": "trace"})).with_tokens(40, 8),
        ModelReply::final_answer(json!({"smoke": "complete"})).with_tokens(20, 6),
    ]));

    let (queue, receiver) = TaskQueue::unbounded();
    let cancellations = CancellationRegistry::new();
    let metrics = Metrics::new();
    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        tasks.clone(),
        TraceWriter::new(traces.clone()),
        Arc::new(registry),
        model,
        cancellations.clone(),
        PricingTable::default(),
        metrics.clone(),
    ));
    let worker = Worker::new(
        receiver,
        tasks.clone(),
        agents.clone(),
        orchestrator,
        cancellations.clone(),
        shutdown.clone(),
        metrics,
        WorkerSettings::default(),
    );
    let worker = tokio::spawn(worker.run());

    let service = TaskService::new(
        tasks.clone(),
        traces.clone(),
        agents,
        queue,
        cancellations,
        Metrics::new(),
    );
    let created = service
        .create_task(CreateTaskRequest::new(demo_agent().id, json!({"q": "smoke"})))
        .await
        .map_err(|error| format!("task creation failed: {error}"))?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let finished = loop {
        if let Some(task) = tasks
            .find_by_id(&created.id)
            .await
            .map_err(|error| format!("task lookup failed: {error}"))?
        {
            if task.is_terminal() {
                break task;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            shutdown.cancel();
            return Err("task did not reach a terminal status within 5s".to_string());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    shutdown.cancel();
    let _ = worker.await;

    if finished.status != TaskStatus::Succeeded {
        return Err(format!(
            "expected succeeded, got {} ({})",
            finished.status.as_str(),
            finished.error_message.unwrap_or_default()
        ));
    }
    let trace_count = traces
        .list_for_task(&finished.id)
        .await
        .map_err(|error| format!("trace lookup failed: {error}"))?
        .len();
    Ok(format!(
        "scripted task succeeded with {} traces and {} tokens",
        trace_count,
        finished.total_tokens()
    ))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
