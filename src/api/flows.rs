/// Flow management REST API endpoints
///
/// CRUD over flow definitions. Every write is compiled first so a flow that cannot be
/// walked is never stored, and the registry is refreshed right after the write.

use crate::{
    api::{
        response::{ok, ApiError, ApiResult},
        AppState,
    },
    flow::{registry::CompiledFlow, types::Flow},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;

/// Create flow management routes
pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows", get(list_flows).post(create_flow))
        .route("/api/flows/{id}", get(get_flow).put(update_flow).delete(delete_flow))
}

/// Reject flows that cannot be walked from a well-defined start node
fn validate(flow: &Flow) -> Result<(), ApiError> {
    if flow.id.trim().is_empty() || flow.name.trim().is_empty() {
        return Err(ApiError::bad_request("Flow id and name are required"));
    }
    let compiled = CompiledFlow::compile(flow.clone(), "unsaved")?;
    compiled.require_start_node()?;
    Ok(())
}

/// Create a new flow
///
/// POST /api/flows
/// Body: { "id": "...", "name": "...", "nodes": [...], "edges": [...], "is_active": true }
async fn create_flow(State(state): State<AppState>, payload: Result<Json<Flow>, JsonRejection>) -> ApiResult {
    let Json(flow) = payload?;
    validate(&flow)?;

    if state.storage.exists(&flow.id).await? {
        return Err(ApiError::conflict(format!("Flow '{}' already exists", flow.id)));
    }

    state.storage.save_flow(&flow).await?;
    state.registry.load(&flow.id).await?;

    tracing::info!("🔥 Created flow: {} ({})", flow.id, flow.name);
    Ok(ok(json!({
        "id": flow.id,
        "message": format!("Flow '{}' created successfully", flow.name),
    })))
}

/// List all flows
///
/// GET /api/flows
async fn list_flows(State(state): State<AppState>) -> ApiResult {
    let flows = state.storage.list_flows().await?;
    Ok(ok(flows))
}

/// Get a flow definition by ID
///
/// GET /api/flows/{id}
async fn get_flow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.storage.get_flow(&id).await? {
        Some(flow) => Ok(ok(flow)),
        None => Err(ApiError::not_found(format!("Flow '{}' not found", id))),
    }
}

/// Replace an existing flow
///
/// PUT /api/flows/{id}
/// The path ID wins over any ID in the body.
async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Flow>, JsonRejection>,
) -> ApiResult {
    let Json(mut flow) = payload?;
    flow.id = id;
    validate(&flow)?;

    if !state.storage.exists(&flow.id).await? {
        return Err(ApiError::not_found(format!("Flow '{}' not found", flow.id)));
    }

    state.storage.save_flow(&flow).await?;
    state.registry.load(&flow.id).await?;

    tracing::info!("🔄 Updated flow: {} ({})", flow.id, flow.name);
    Ok(ok(json!({
        "id": flow.id,
        "message": format!("Flow '{}' updated successfully", flow.name),
    })))
}

/// Delete a flow
///
/// DELETE /api/flows/{id}
async fn delete_flow(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    if !state.storage.delete_flow(&id).await? {
        return Err(ApiError::not_found(format!("Flow '{}' not found", id)));
    }
    state.registry.evict(&id);

    tracing::info!("🗑️ Deleted flow: {}", id);
    Ok(ok(json!({ "id": id, "message": "Flow deleted successfully" })))
}
