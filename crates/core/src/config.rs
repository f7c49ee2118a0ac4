use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::pricing::{ModelRates, PricingTable};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub pricing: PricingTable,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// None means the reference unbounded queue.
    pub queue_capacity: Option<usize>,
    pub load_retry_attempts: u32,
    pub load_retry_delay_ms: u64,
    pub transient_retry_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Root directory the file.write tool is confined to.
    pub file_root: PathBuf,
    pub max_file_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub sandbox_root: Option<PathBuf>,
    pub queue_capacity: Option<usize>,
    pub model_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid pricing rate for model `{model}`: `{value}`")]
    InvalidPricingRate { model: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://taskrun.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            worker: WorkerConfig {
                queue_capacity: None,
                load_retry_attempts: 5,
                load_retry_delay_ms: 50,
                transient_retry_delay_ms: 250,
            },
            model: ModelConfig { api_key: None, base_url: None, timeout_secs: 30 },
            sandbox: SandboxConfig {
                file_root: PathBuf::from("./sandbox"),
                max_file_bytes: 64 * 1024,
            },
            pricing: PricingTable::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    worker: Option<WorkerPatch>,
    model: Option<ModelPatch>,
    sandbox: Option<SandboxPatch>,
    pricing: Option<HashMap<String, PricingPatch>>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    queue_capacity: Option<usize>,
    load_retry_attempts: Option<u32>,
    load_retry_delay_ms: Option<u64>,
    transient_retry_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SandboxPatch {
    file_root: Option<PathBuf>,
    max_file_bytes: Option<u64>,
}

// Rates arrive as strings so TOML floats never round monetary values.
#[derive(Debug, Deserialize)]
struct PricingPatch {
    input_per_1k: String,
    output_per_1k: String,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<String>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("taskrun.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(worker) = patch.worker {
            if let Some(queue_capacity) = worker.queue_capacity {
                self.worker.queue_capacity = Some(queue_capacity);
            }
            if let Some(load_retry_attempts) = worker.load_retry_attempts {
                self.worker.load_retry_attempts = load_retry_attempts;
            }
            if let Some(load_retry_delay_ms) = worker.load_retry_delay_ms {
                self.worker.load_retry_delay_ms = load_retry_delay_ms;
            }
            if let Some(transient_retry_delay_ms) = worker.transient_retry_delay_ms {
                self.worker.transient_retry_delay_ms = transient_retry_delay_ms;
            }
        }

        if let Some(model) = patch.model {
            if let Some(model_api_key_value) = model.api_key {
                self.model.api_key = Some(model_api_key_value.into());
            }
            if let Some(base_url) = model.base_url {
                self.model.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
        }

        if let Some(sandbox) = patch.sandbox {
            if let Some(file_root) = sandbox.file_root {
                self.sandbox.file_root = file_root;
            }
            if let Some(max_file_bytes) = sandbox.max_file_bytes {
                self.sandbox.max_file_bytes = max_file_bytes;
            }
        }

        if let Some(pricing) = patch.pricing {
            for (model, rates) in pricing {
                self.pricing.insert(model.clone(), parse_rates(&model, rates)?);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format.parse()?;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TASKRUN_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TASKRUN_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TASKRUN_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TASKRUN_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TASKRUN_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKRUN_WORKER_QUEUE_CAPACITY") {
            self.worker.queue_capacity =
                Some(parse_u64("TASKRUN_WORKER_QUEUE_CAPACITY", &value)? as usize);
        }
        if let Some(value) = read_env("TASKRUN_WORKER_LOAD_RETRY_ATTEMPTS") {
            self.worker.load_retry_attempts =
                parse_u32("TASKRUN_WORKER_LOAD_RETRY_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("TASKRUN_MODEL_API_KEY") {
            self.model.api_key = Some(value.into());
        }
        if let Some(value) = read_env("TASKRUN_MODEL_BASE_URL") {
            self.model.base_url = Some(value);
        }

        if let Some(value) = read_env("TASKRUN_SANDBOX_FILE_ROOT") {
            self.sandbox.file_root = PathBuf::from(value);
        }
        if let Some(value) = read_env("TASKRUN_SANDBOX_MAX_FILE_BYTES") {
            self.sandbox.max_file_bytes = parse_u64("TASKRUN_SANDBOX_MAX_FILE_BYTES", &value)?;
        }

        if let Some(value) = read_env("TASKRUN_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TASKRUN_SERVER_PORT") {
            self.server.port = parse_u16("TASKRUN_SERVER_PORT", &value)?;
        }

        if let Some(value) = read_env("TASKRUN_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("TASKRUN_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(sandbox_root) = overrides.sandbox_root {
            self.sandbox.file_root = sandbox_root;
        }
        if let Some(queue_capacity) = overrides.queue_capacity {
            self.worker.queue_capacity = Some(queue_capacity);
        }
        if let Some(model_api_key) = overrides.model_api_key {
            self.model.api_key = Some(model_api_key.into());
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.worker.load_retry_attempts == 0 {
            return Err(ConfigError::Validation(
                "worker.load_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.worker.queue_capacity == Some(0) {
            return Err(ConfigError::Validation(
                "worker.queue_capacity must be at least 1 when bounded".to_string(),
            ));
        }
        if self.sandbox.max_file_bytes == 0 {
            return Err(ConfigError::Validation(
                "sandbox.max_file_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_rates(model: &str, patch: PricingPatch) -> Result<ModelRates, ConfigError> {
    let input_per_1k = parse_rate(model, &patch.input_per_1k)?;
    let output_per_1k = parse_rate(model, &patch.output_per_1k)?;
    Ok(ModelRates { input_per_1k, output_per_1k })
}

fn parse_rate(model: &str, value: &str) -> Result<Decimal, ConfigError> {
    let rate = Decimal::from_str(value.trim()).map_err(|_| ConfigError::InvalidPricingRate {
        model: model.to_string(),
        value: value.to_string(),
    })?;
    if rate.is_sign_negative() {
        return Err(ConfigError::InvalidPricingRate {
            model: model.to_string(),
            value: value.to_string(),
        });
    }
    Ok(rate)
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("taskrun.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}
