//! Core domain types for the taskrun orchestration runtime.
//!
//! This crate is persistence- and transport-free: it defines the task and
//! trace records, the agent configuration shape, the status state machines,
//! pricing/token accounting helpers, the metrics contract, and application
//! configuration. Everything that does I/O lives in `taskrun-db`,
//! `taskrun-runtime`, and `taskrun-server`.

pub mod config;
pub mod domain;
pub mod errors;
pub mod metrics;
pub mod pricing;

pub use chrono;

pub use domain::agent::{AgentConfig, AgentId, MAX_AGENT_STEPS, MIN_AGENT_STEPS};
pub use domain::task::{AgentTask, GuardrailDecision, TaskId, TaskStatus, MAX_ERROR_MESSAGE_LEN};
pub use domain::trace::{AgentTrace, TraceId, TraceKind, MODEL_STEP_NAME, MISSING_TOOL_NAME};
pub use errors::DomainError;
pub use metrics::{Metrics, MetricsSnapshot};
pub use pricing::{fallback_token_estimate, ModelRates, PricingTable};
