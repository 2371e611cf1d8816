/// clinicflow: flow execution engine for clinic automations
///
/// Flows are node/edge graphs (trigger, condition, ai_analysis, database and HTTP nodes,
/// ...) walked one node at a time, with `{{path}}` templates resolved against the input
/// and the results of earlier nodes.

// Core configuration and setup
pub mod config;

// SQLite connection and schema
pub mod db;

// Flow definitions, storage and the compiled flow registry
pub mod flow;

// External collaborators: data store and text generation
pub mod integrations;

// Graph walker, node executors, templates and execution tracking
pub mod runtime;

// HTTP API layer - flow management and execution endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use flow::{CompiledFlow, Edge, Flow, FlowNode, NodeConfig, NodeType};
pub use runtime::{Execution, ExecutionStatus, FlowEngine};
pub use server::start_server;
