/// HTTP API Layer
///
/// This module provides the REST API endpoints for flow management and execution.
/// It handles:
/// - Flow CRUD operations
/// - Starting executions and polling their status and logs
/// - The shared JSON success/error envelope

// Flow management endpoints (POST/GET/PUT/DELETE)
pub mod flows;

// Execution start and status endpoints
pub mod executions;

// `{ success, data | error }` envelopes and ApiError
pub mod response;

use crate::{
    flow::{FlowRegistry, FlowStorage},
    runtime::FlowEngine,
};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Flow storage for persistence
    pub storage: FlowStorage,
    /// Compiled flow cache
    pub registry: Arc<FlowRegistry>,
    pub engine: Arc<FlowEngine>,
}

// Re-export router builders
pub use executions::create_execution_routes;
pub use flows::create_flow_routes;
