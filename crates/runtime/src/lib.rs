//! Agent task orchestration runtime.
//!
//! The runtime accepts asynchronous agent tasks, runs a bounded step loop
//! against a pluggable model adapter and a set of sandboxed tools, persists
//! an auditable trace of every step, tracks token/cost accounting, and
//! supports cooperative cancellation and retry.
//!
//! Control flow: the task service creates a task record (Pending) and
//! enqueues its id. The worker dequeues, transitions the task to Running,
//! resolves the agent configuration, and drives the orchestrator loop:
//! build context, call the model, branch into tool execution or completion,
//! write traces, and commit a terminal status. Cancellation is polled at
//! each loop iteration boundary via the cancellation registry.

pub mod cancel;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod service;
pub mod tools;
pub mod trace;
pub mod worker;

pub use cancel::CancellationRegistry;
pub use model::{ModelAction, ModelAdapter, ModelReply, ModelRequest};
pub use orchestrator::Orchestrator;
pub use queue::{TaskQueue, TaskQueueReceiver};
pub use service::{CreateTaskRequest, ServiceError, TaskService};
pub use tools::{Tool, ToolContext, ToolOutcome, ToolRegistry};
pub use trace::TraceWriter;
pub use worker::{Worker, WorkerSettings};
