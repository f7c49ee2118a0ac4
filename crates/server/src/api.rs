//! Thin HTTP surface over the task service: create, inspect, cancel, retry.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use taskrun_core::domain::agent::AgentId;
use taskrun_core::domain::task::{GuardrailDecision, TaskId};
use taskrun_runtime::{CreateTaskRequest, ServiceError, TaskService};

use crate::health;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TaskService>,
    pub db_pool: taskrun_db::DbPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/traces", get(list_traces))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/tasks/{id}/retry", post(retry_task))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    pub agent_id: String,
    pub input: Value,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub guardrail_decision: Option<String>,
    #[serde(default)]
    pub guardrail_metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let status = match &error {
            ServiceError::AgentNotFound(_) | ServiceError::TaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::TerminalConflict(_, _) | ServiceError::NotTerminal(_, _) => {
                StatusCode::CONFLICT
            }
            ServiceError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Domain(_) | ServiceError::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self { status, message: error.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(event_name = "api.error", status = %self.status, message = %self.message);
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> Result<impl IntoResponse, ApiError> {
    let guardrail_decision = match body.guardrail_decision.as_deref() {
        None => None,
        Some(raw) => Some(GuardrailDecision::parse(raw).ok_or_else(|| {
            ApiError::bad_request(format!("unknown guardrail decision: {raw}"))
        })?),
    };

    let mut request = CreateTaskRequest::new(AgentId(body.agent_id), body.input);
    request.tenant = body.tenant;
    request.requested_by = body.requested_by;
    request.guardrail_decision = guardrail_decision;
    request.guardrail_metadata = body.guardrail_metadata;

    let task = state.service.create_task(request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.service.get_task(&TaskId(id)).await?;
    Ok(Json(task))
}

async fn list_traces(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let traces = state.service.list_traces(&TaskId(id)).await?;
    Ok(Json(traces))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.service.cancel_task(&TaskId(id)).await?;
    Ok(Json(task))
}

async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.service.retry_task(&TaskId(id)).await?;
    Ok((StatusCode::CREATED, Json(task)))
}
