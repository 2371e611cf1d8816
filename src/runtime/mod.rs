/// Runtime Execution Engine
///
/// This module walks compiled flows node by node. It handles:
/// - Template resolution against the accumulated context
/// - Individual node execution
/// - Edge selection and the walk itself
/// - Persistent execution records and logs

// Graph walker driving a single execution
pub mod engine;

// Individual node execution handlers
pub mod executor;

// Execution scope and per-node results
pub mod context;

// `{{path}}` resolution and condition truthiness
pub mod template;

// flow_executions / flow_execution_logs persistence
pub mod tracker;

pub use engine::FlowEngine;
pub use executor::NodeExecutor;
pub use tracker::{Execution, ExecutionStatus, ExecutionTracker, LogEntry, LogLevel, NewExecution};
