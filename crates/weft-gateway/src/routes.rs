use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use weft_core::error::WeftError;
use weft_core::execution::{ExecutionStatus, WorkflowExecution};
use weft_core::types::MessageStatus;
use weft_core::workflow::Workflow;

use crate::auth;
use crate::middleware::Authenticated;
use crate::state::AppState;

type ApiResult<T = Json<Value>> = Result<T, (StatusCode, Json<Value>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn from_weft(e: WeftError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        WeftError::Traversal(_) | WeftError::Json(_) | WeftError::Resolve(_) => {
            StatusCode::BAD_REQUEST
        }
        WeftError::InvalidTransition { .. } | WeftError::DuplicateExecution(_) => {
            StatusCode::CONFLICT
        }
        WeftError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

fn busy(id: &str) -> (StatusCode, Json<Value>) {
    api_error(
        StatusCode::CONFLICT,
        format!("execution {} is being changed by another request", id),
    )
}

fn require(allowed: bool) -> ApiResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(api_error(StatusCode::FORBIDDEN, "insufficient role"))
    }
}

async fn load_workflow(state: &AppState, id: &str) -> ApiResult<Workflow> {
    state
        .store
        .load_workflow(id)
        .await
        .map_err(from_weft)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("workflow not found: {}", id)))
}

async fn load_execution(state: &AppState, id: &str) -> ApiResult<WorkflowExecution> {
    state
        .store
        .load_execution(id)
        .await
        .map_err(from_weft)?
        .ok_or_else(|| from_weft(WeftError::ExecutionNotFound(id.to_string())))
}

// GET /api/health (no auth)
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "in_flight": state.engine.registry().len(),
    }))
}

// ── Workflows ───────────────────────────────────────────────────

// GET /api/workflows (Viewer+)
pub async fn list_workflows(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
) -> ApiResult {
    require(auth::has_viewer_access(&auth_result.role))?;
    let workflows = state.store.list_workflows().await.map_err(from_weft)?;
    Ok(Json(json!({ "workflows": workflows })))
}

// POST /api/workflows (Admin)
pub async fn save_workflow(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(workflow): Json<Workflow>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require(auth::has_admin_access(&auth_result.role))?;
    state.engine.validate(&workflow).map_err(from_weft)?;
    state.store.save_workflow(&workflow).await.map_err(from_weft)?;
    info!(workflow_id = %workflow.id, by = %auth_result.name, "Workflow saved");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": workflow.id, "warnings": workflow.lint() })),
    ))
}

// GET /api/workflows/{id} (Viewer+)
pub async fn get_workflow(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workflow>> {
    require(auth::has_viewer_access(&auth_result.role))?;
    Ok(Json(load_workflow(&state, &id).await?))
}

// DELETE /api/workflows/{id} (Admin)
pub async fn delete_workflow(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require(auth::has_admin_access(&auth_result.role))?;
    if state.store.delete_workflow(&id).await.map_err(from_weft)? {
        info!(workflow_id = %id, "Workflow deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("workflow not found: {}", id)))
    }
}

// ── Executions ──────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct ExecuteBody {
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// Persist the snapshot a background run ends with.
async fn save_outcome(state: &AppState, execution_id: &str, outcome: weft_core::Result<WorkflowExecution>) {
    match outcome {
        Ok(execution) => {
            if let Err(e) = state.store.save_execution(&execution).await {
                error!(execution_id = %execution_id, error = %e, "Failed to save execution snapshot");
            }
        }
        Err(e) => warn!(execution_id = %execution_id, error = %e, "Execution did not run"),
    }
}

// POST /api/workflows/{id}/execute (Operator+)
pub async fn execute_workflow(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ExecuteBody>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require(auth::has_operator_access(&auth_result.role))?;
    let workflow = load_workflow(&state, &id).await?;
    let inputs = body.map(|Json(b)| b.inputs).unwrap_or_default();

    let execution = state.engine.prepare(&workflow, inputs).map_err(from_weft)?;
    let execution_id = execution.id.clone();
    let guard = state.lock_execution(&execution_id).ok_or_else(|| busy(&execution_id))?;
    state.store.save_execution(&execution).await.map_err(from_weft)?;
    // Registered before the 202; an immediate cancel must find it
    let claim = state.engine.claim(&execution).map_err(from_weft)?;
    info!(execution_id = %execution_id, workflow_id = %id, "Execution accepted");

    let task_state = Arc::clone(&state);
    let task_id = execution_id.clone();
    tokio::spawn(async move {
        let outcome = task_state.engine.run_claimed(&workflow, execution, claim).await;
        save_outcome(&task_state, &task_id, outcome).await;
        drop(guard);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution_id })),
    ))
}

// GET /api/executions/{id} (Viewer+)
pub async fn get_execution(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    require(auth::has_viewer_access(&auth_result.role))?;
    let execution = load_execution(&state, &id).await?;
    let mut body = serde_json::to_value(&execution).map_err(|e| from_weft(e.into()))?;
    if let Value::Object(map) = &mut body {
        map.insert(
            "in_flight".into(),
            Value::Bool(state.engine.registry().contains(&id)),
        );
    }
    Ok(Json(body))
}

#[derive(Deserialize, Default)]
pub struct ResumeBody {
    #[serde(default)]
    pub input: Value,
}

// POST /api/executions/{id}/resume (Operator+)
pub async fn resume_execution(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ResumeBody>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require(auth::has_operator_access(&auth_result.role))?;
    let guard = state.lock_execution(&id).ok_or_else(|| busy(&id))?;

    // Loaded under the guard, so no other request can have moved it on
    let execution = load_execution(&state, &id).await?;
    if execution.status != ExecutionStatus::Paused {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("execution {} is {}, not paused", id, execution.status),
        ));
    }
    let workflow = load_workflow(&state, &execution.workflow_id).await?;
    let input = body.map(|Json(b)| b.input).unwrap_or_default();
    let claim = state.engine.claim(&execution).map_err(from_weft)?;
    info!(execution_id = %id, by = %auth_result.name, "Resume accepted");

    let task_state = Arc::clone(&state);
    let task_id = id.clone();
    tokio::spawn(async move {
        let outcome = task_state
            .engine
            .resume_claimed(&workflow, execution, input, claim)
            .await;
        save_outcome(&task_state, &task_id, outcome).await;
        drop(guard);
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "execution_id": id }))))
}

// POST /api/executions/{id}/cancel (Operator+)
pub async fn cancel_execution(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    require(auth::has_operator_access(&auth_result.role))?;

    // In-flight runs stop themselves and save their own final snapshot
    if state.engine.request_cancel(&id) {
        info!(execution_id = %id, "Cancellation requested");
        return Ok(Json(json!({ "execution_id": id, "status": "cancelling" })));
    }

    let _guard = state.lock_execution(&id).ok_or_else(|| busy(&id))?;
    let mut execution = load_execution(&state, &id).await?;
    state.engine.cancel(&mut execution).map_err(from_weft)?;
    state.store.save_execution(&execution).await.map_err(from_weft)?;
    Ok(Json(json!({ "execution_id": id, "status": execution.status })))
}

// ── Inbox callback ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CallbackBody {
    pub message_id: String,
    #[serde(flatten)]
    pub report: MessageStatus,
}

// POST /api/inbox/callback (Operator+)
pub async fn inbox_callback(
    Authenticated(auth_result): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallbackBody>,
) -> ApiResult {
    require(auth::has_operator_access(&auth_result.role))?;
    let Some(outcome) = body.report.outcome() else {
        return Ok(Json(json!({ "delivered": false, "terminal": false })));
    };
    let delivered = state.engine.deliver_callback(&body.message_id, outcome);
    info!(message_id = %body.message_id, delivered, "Inbox callback received");
    Ok(Json(json!({ "delivered": delivered, "terminal": true })))
}
