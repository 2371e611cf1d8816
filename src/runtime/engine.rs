/// Flow walker
///
/// Executes one node at a time starting from the compiled start node. After each node the
/// outgoing edges are evaluated in definition order against the updated context and the
/// first match picks the next node. The walk ends when no edge matches, when a node fails
/// without `continueOnError`, or when the step limit is reached.

use crate::flow::registry::CompiledFlow;
use crate::runtime::{
    context::{ExecutionScope, NodeResults},
    executor::NodeExecutor,
    tracker::{Execution, ExecutionTracker, LogLevel, NewExecution},
};
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;

/// Result of walking a flow to its end
struct WalkOutcome {
    /// Node ids in execution order, repeated when a cycle revisits a node
    path: Vec<String>,
    results: NodeResults,
    error: Option<anyhow::Error>,
}

/// Graph walking engine with persistent execution tracking
pub struct FlowEngine {
    executor: Arc<NodeExecutor>,
    tracker: ExecutionTracker,
    max_steps: usize,
}

impl FlowEngine {
    pub fn new(executor: Arc<NodeExecutor>, tracker: ExecutionTracker, max_steps: usize) -> Self {
        Self {
            executor,
            tracker,
            max_steps,
        }
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Create the execution record and walk the flow in the background
    ///
    /// Returns as soon as the record exists; its status is `running` until the walk ends.
    pub async fn start(self: &Arc<Self>, flow: Arc<CompiledFlow>, request: NewExecution) -> Result<Execution> {
        let execution = self.tracker.create(flow.id(), &request).await?;
        let scope = scope_for(&execution, request);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run(&flow, &scope).await;
        });

        Ok(execution)
    }

    /// Walk the flow to completion and return the final execution record
    pub async fn execute(&self, flow: &CompiledFlow, request: NewExecution) -> Result<Execution> {
        let execution = self.tracker.create(flow.id(), &request).await?;
        let scope = scope_for(&execution, request);

        self.run(flow, &scope).await;

        self.tracker
            .get(&execution.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Execution {} disappeared", execution.id))
    }

    async fn run(&self, flow: &CompiledFlow, scope: &ExecutionScope) {
        let flow_start_time = std::time::Instant::now();
        tracing::info!("🚀 Starting flow execution: {} ({})", flow.id(), scope.execution_id);

        let outcome = self.walk(flow, scope).await;
        let duration = flow_start_time.elapsed();
        let execution_id = scope.execution_id.as_str();

        match outcome.error {
            None => {
                if let Err(e) = self.tracker.complete(execution_id, &outcome.results).await {
                    tracing::warn!("⚠️ Failed to mark execution {} completed: {:#}", execution_id, e);
                }
                self.record(
                    execution_id,
                    None,
                    LogLevel::Info,
                    "Flow completed",
                    json!({ "path": outcome.path, "duration_ms": duration.as_millis() as u64 }),
                )
                .await;
                tracing::info!("🎉 Flow '{}' execution completed successfully in {:?}", flow.id(), duration);
            }
            Some(error) => {
                let message = format!("{:#}", error);
                let stack = format!("{:?}", error);
                if let Err(e) = self.tracker.fail(execution_id, &outcome.results, &message, &stack).await {
                    tracing::warn!("⚠️ Failed to mark execution {} failed: {:#}", execution_id, e);
                }
                self.record(
                    execution_id,
                    None,
                    LogLevel::Error,
                    "Flow failed",
                    json!({ "path": outcome.path, "error": message }),
                )
                .await;
            }
        }
    }

    async fn walk(&self, flow: &CompiledFlow, scope: &ExecutionScope) -> WalkOutcome {
        let execution_id = scope.execution_id.as_str();
        let mut results = NodeResults::new();
        let mut path = Vec::new();

        let start = flow.start_node();
        if flow.start_is_fallback() {
            self.record(
                execution_id,
                Some(&start.id),
                LogLevel::Warn,
                "No node without incoming edges, starting at the first node",
                json!({ "node_id": start.id }),
            )
            .await;
        }

        let mut current = Some(start);
        while let Some(node) = current {
            if path.len() >= self.max_steps {
                let error = anyhow::anyhow!("Flow exceeded the maximum of {} steps", self.max_steps);
                return WalkOutcome {
                    path,
                    results,
                    error: Some(error),
                };
            }
            path.push(node.id.clone());

            tracing::info!("📍 Step {}: Executing node '{}' (type: {})", path.len(), node.id, node.node_type());
            if let Err(e) = self.tracker.set_current_node(execution_id, &node.id).await {
                tracing::warn!("⚠️ Failed to record current node {}: {:#}", node.id, e);
            }
            self.record(
                execution_id,
                Some(&node.id),
                LogLevel::Info,
                &format!("Executing {} node '{}'", node.node_type(), node.display_name()),
                Value::Null,
            )
            .await;

            match self.executor.execute_node(node, scope, &results).await {
                Ok(result) => {
                    self.record(
                        execution_id,
                        Some(&node.id),
                        LogLevel::Debug,
                        &format!("Node '{}' completed", node.id),
                        result.clone(),
                    )
                    .await;
                    results = results.with(&node.id, result);
                    self.save_results(execution_id, &results).await;

                    let context = scope.context_with(&results);
                    current = flow.next_node(&node.id, &context);
                }
                Err(error) => {
                    let message = format!("{:#}", error);
                    results = results.with(&node.id, json!({ "success": false, "error": message }));
                    self.save_results(execution_id, &results).await;
                    self.record(
                        execution_id,
                        Some(&node.id),
                        LogLevel::Error,
                        &format!("Node '{}' failed: {}", node.id, message),
                        json!({ "error": message, "continue_on_error": node.continue_on_error }),
                    )
                    .await;

                    if !node.continue_on_error {
                        return WalkOutcome {
                            path,
                            results,
                            error: Some(error.context(format!("Node '{}' failed", node.id))),
                        };
                    }
                    current = flow.unconditional_next(&node.id);
                }
            }
        }

        WalkOutcome {
            path,
            results,
            error: None,
        }
    }

    async fn save_results(&self, execution_id: &str, results: &NodeResults) {
        if let Err(e) = self.tracker.save_results(execution_id, results).await {
            tracing::warn!("⚠️ Failed to save node results for {}: {:#}", execution_id, e);
        }
    }

    /// Append to the execution log; tracking failures never abort the walk
    async fn record(&self, execution_id: &str, node_id: Option<&str>, level: LogLevel, message: &str, data: Value) {
        if let Err(e) = self.tracker.log(execution_id, node_id, level, message, data).await {
            tracing::warn!("⚠️ Failed to write execution log for {}: {:#}", execution_id, e);
        }
    }
}

fn scope_for(execution: &Execution, request: NewExecution) -> ExecutionScope {
    ExecutionScope {
        execution_id: execution.id.clone(),
        flow_id: execution.flow_id.clone(),
        context_type: request.context_type,
        context_id: request.context_id,
        input: request.input_data,
    }
}
