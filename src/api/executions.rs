/// Flow execution endpoints
///
/// `POST /api/flows/execute` only acknowledges that an execution started; the walk runs in
/// the background and callers poll `GET /api/executions/{id}` for the outcome.

use crate::{
    api::{
        response::{ok, ApiError, ApiResult},
        AppState,
    },
    runtime::NewExecution,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for starting an execution
///
/// Every field is optional at the serde level so a missing `flow_id` is reported as a
/// readable 400 rather than a generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteFlowRequest {
    pub flow_id: Option<String>,
    pub context_type: Option<String>,
    /// Accepts strings or numbers
    pub context_id: Option<Value>,
    pub input_data: Option<Value>,
    pub triggered_by: Option<String>,
    pub triggered_by_type: Option<String>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows/execute", post(execute_flow))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/logs", get(get_execution_logs))
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    field
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", name)))
}

fn context_id(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(id) => Some(id),
        other => Some(other.to_string()),
    }
}

/// Start a flow execution
///
/// POST /api/flows/execute
/// Body: { "flow_id": "...", "context_type": "appointment", "context_id": "...", "input_data": {...} }
async fn execute_flow(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteFlowRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let flow_id = required(request.flow_id, "flow_id")?;
    let context_type = required(request.context_type, "context_type")?;

    let flow = match state.registry.load(&flow_id).await? {
        Some(flow) if flow.is_active() => flow,
        _ => return Err(ApiError::not_found("Flow not found or inactive")),
    };

    let execution = state
        .engine
        .start(
            flow.clone(),
            NewExecution {
                context_type,
                context_id: context_id(request.context_id),
                input_data: request.input_data.unwrap_or_else(|| json!({})),
                triggered_by: request.triggered_by,
                triggered_by_type: request.triggered_by_type,
            },
        )
        .await?;

    tracing::info!("🎯 Started execution {} of flow '{}'", execution.id, flow.id());
    Ok(ok(json!({
        "execution_id": execution.id,
        "flow_id": flow.id(),
        "flow_name": flow.name(),
        "status": execution.status,
    })))
}

/// GET /api/executions/{id}
async fn get_execution(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.engine.tracker().get(&id).await? {
        Some(execution) => Ok(ok(execution)),
        None => Err(ApiError::not_found(format!("Execution '{}' not found", id))),
    }
}

/// GET /api/executions/{id}/logs
async fn get_execution_logs(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    if state.engine.tracker().get(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("Execution '{}' not found", id)));
    }
    let logs = state.engine.tracker().logs(&id).await?;
    Ok(ok(logs))
}
