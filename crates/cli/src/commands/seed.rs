use chrono::Utc;

use crate::commands::CommandResult;
use taskrun_core::config::{AppConfig, LoadOptions};
use taskrun_core::domain::agent::{AgentConfig, AgentId};
use taskrun_db::repositories::{AgentRepository, SqlAgentRepository};
use taskrun_db::{connect_with_settings, migrations};

pub const DEMO_AGENT_ID: &str = "researcher";

/// Demo agent used by quickstarts and the smoke run. Allowlists every
/// built-in tool.
pub fn demo_agent() -> AgentConfig {
    AgentConfig {
        id: AgentId(DEMO_AGENT_ID.to_string()),
        system_prompt: "You are a research assistant. Prefer tools over guessing.".to_string(),
        tool_allowlist: vec![
            "web.search".to_string(),
            "db.query".to_string(),
            "file.write".to_string(),
        ],
        model: "echo".to_string(),
        temperature: 0.2,
        max_steps: 8,
        is_enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let agents = SqlAgentRepository::new(pool.clone());
        let existing = agents
            .find_by_id(&AgentId(DEMO_AGENT_ID.to_string()))
            .await
            .map_err(|error| ("seed", error.to_string(), 5u8))?;
        let message = if existing.is_some() {
            format!("demo agent `{DEMO_AGENT_ID}` already present")
        } else {
            agents
                .save(&demo_agent())
                .await
                .map_err(|error| ("seed", error.to_string(), 5u8))?;
            format!("seeded demo agent `{DEMO_AGENT_ID}`")
        };
        pool.close().await;
        Ok::<String, (&'static str, String, u8)>(message)
    });

    match result {
        Ok(message) => CommandResult::success("seed", message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
