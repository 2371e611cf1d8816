/// Execution tracking: one row per execution plus an append-only log stream
///
/// Every write is mirrored to `tracing` so the server log tells the same story as the
/// persisted execution log.

use crate::runtime::context::NodeResults;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, sqlite::SqliteRow, Row};
use std::fmt;

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown execution status '{}'", other)),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Request to start an execution
#[derive(Debug, Clone, Default)]
pub struct NewExecution {
    /// Kind of record the run is about (e.g., "appointment", "patient")
    pub context_type: String,
    /// ID of that record, if any
    pub context_id: Option<String>,
    /// Input exposed to templates at the top level and under `input`
    pub input_data: Value,
    /// Who started the run (user ID, system name)
    pub triggered_by: Option<String>,
    /// Kind of trigger (e.g., "user", "system")
    pub triggered_by_type: Option<String>,
}

/// Persisted execution state
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    /// Execution ID (UUID v4)
    pub id: String,
    pub flow_id: String,
    pub context_type: String,
    pub context_id: Option<String>,
    pub input_data: Value,
    /// Node being executed, or the last one executed once finished
    pub current_node_id: Option<String>,
    /// `{ node_id: result }` for every node executed so far
    pub node_results: Value,
    pub status: ExecutionStatus,
    pub triggered_by: Option<String>,
    pub triggered_by_type: Option<String>,
    /// Failure message with its cause chain, set when status is failed
    pub error_message: Option<String>,
    /// Debug rendering of the failure, including every cause
    pub error_stack: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set once the execution completes or fails
    pub completed_at: Option<DateTime<Utc>>,
}

/// One entry in an execution's log stream
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Autoincrement ID; orders entries within an execution
    pub id: i64,
    pub execution_id: String,
    /// Node the entry is about; None for flow-level entries
    pub node_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    /// Structured detail (node result, error, walked path)
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed execution tracker
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    pool: SqlitePool,
}

impl ExecutionTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a running execution record
    pub async fn create(&self, flow_id: &str, request: &NewExecution) -> Result<Execution> {
        let execution = Execution {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            context_type: request.context_type.clone(),
            context_id: request.context_id.clone(),
            input_data: request.input_data.clone(),
            current_node_id: None,
            node_results: Value::Object(Default::default()),
            status: ExecutionStatus::Running,
            triggered_by: request.triggered_by.clone(),
            triggered_by_type: request.triggered_by_type.clone(),
            error_message: None,
            error_stack: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO flow_executions (
                id, flow_id, context_type, context_id, input_data, current_node_id,
                node_results, status, triggered_by, triggered_by_type, started_at
            )
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.flow_id)
        .bind(&execution.context_type)
        .bind(&execution.context_id)
        .bind(execution.input_data.to_string())
        .bind(execution.node_results.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.triggered_by)
        .bind(&execution.triggered_by_type)
        .bind(execution.started_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to create execution record")?;

        tracing::info!("📝 Created execution {} for flow {}", execution.id, flow_id);
        Ok(execution)
    }

    /// Record the node currently being executed
    pub async fn set_current_node(&self, execution_id: &str, node_id: &str) -> Result<()> {
        sqlx::query("UPDATE flow_executions SET current_node_id = ? WHERE id = ?")
            .bind(node_id)
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the accumulated node results
    pub async fn save_results(&self, execution_id: &str, results: &NodeResults) -> Result<()> {
        sqlx::query("UPDATE flow_executions SET node_results = ? WHERE id = ?")
            .bind(results.to_json().to_string())
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete(&self, execution_id: &str, results: &NodeResults) -> Result<()> {
        self.finish(execution_id, ExecutionStatus::Completed, results, None, None).await
    }

    pub async fn fail(&self, execution_id: &str, results: &NodeResults, message: &str, stack: &str) -> Result<()> {
        self.finish(execution_id, ExecutionStatus::Failed, results, Some(message), Some(stack))
            .await
    }

    async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        results: &NodeResults,
        error_message: Option<&str>,
        error_stack: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET status = ?, node_results = ?, error_message = ?, error_stack = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(results.to_json().to_string())
        .bind(error_message)
        .bind(error_stack)
        .bind(Utc::now().to_rfc3339())
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark execution {} as {}", execution_id, status))?;

        tracing::info!("🏁 Execution {} {}", execution_id, status);
        Ok(())
    }

    /// Append a log entry for an execution
    pub async fn log(
        &self,
        execution_id: &str,
        node_id: Option<&str>,
        level: LogLevel,
        message: &str,
        data: Value,
    ) -> Result<()> {
        let node = node_id.unwrap_or("-");
        match level {
            LogLevel::Debug => tracing::debug!(execution_id, node, "{}", message),
            LogLevel::Info => tracing::info!(execution_id, node, "{}", message),
            LogLevel::Warn => tracing::warn!(execution_id, node, "{}", message),
            LogLevel::Error => tracing::error!(execution_id, node, "{}", message),
        }

        sqlx::query(
            r#"
            INSERT INTO flow_execution_logs (execution_id, node_id, level, message, data, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .bind(level.as_str())
        .bind(message)
        .bind(data.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to append execution log")?;

        Ok(())
    }

    pub async fn get(&self, execution_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM flow_executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| execution_from_row(&row)).transpose()
    }

    /// Log entries of an execution in insertion order
    pub async fn logs(&self, execution_id: &str) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query("SELECT * FROM flow_execution_logs WHERE execution_id = ? ORDER BY id ASC")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<LogEntry> {
                Ok(LogEntry {
                    id: row.try_get("id")?,
                    execution_id: row.try_get("execution_id")?,
                    node_id: row.try_get("node_id")?,
                    level: LogLevel::parse(row.try_get::<&str, _>("level")?),
                    message: row.try_get("message")?,
                    data: parse_json(row.try_get("data")?)?,
                    created_at: parse_timestamp(row.try_get("created_at")?)?,
                })
            })
            .collect()
    }
}

fn execution_from_row(row: &SqliteRow) -> Result<Execution> {
    Ok(Execution {
        id: row.try_get("id")?,
        flow_id: row.try_get("flow_id")?,
        context_type: row.try_get("context_type")?,
        context_id: row.try_get("context_id")?,
        input_data: parse_json(row.try_get("input_data")?)?,
        current_node_id: row.try_get("current_node_id")?,
        node_results: parse_json(row.try_get("node_results")?)?,
        status: ExecutionStatus::parse(row.try_get("status")?)?,
        triggered_by: row.try_get("triggered_by")?,
        triggered_by_type: row.try_get("triggered_by_type")?,
        error_message: row.try_get("error_message")?,
        error_stack: row.try_get("error_stack")?,
        started_at: parse_timestamp(row.try_get("started_at")?)?,
        completed_at: row
            .try_get::<Option<&str>, _>("completed_at")?
            .map(parse_timestamp)
            .transpose()?,
    })
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).context("Stored JSON column is invalid")
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid timestamp '{}'", text))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    async fn tracker() -> ExecutionTracker {
        let database = Database::in_memory().await.unwrap();
        ExecutionTracker::new(database.pool().clone())
    }

    fn request() -> NewExecution {
        NewExecution {
            context_type: "patient".to_string(),
            context_id: Some("p-1".to_string()),
            input_data: json!({ "patient": { "name": "Ana" } }),
            triggered_by: Some("user-7".to_string()),
            triggered_by_type: Some("staff".to_string()),
        }
    }

    #[tokio::test]
    async fn create_then_complete() {
        let tracker = tracker().await;
        let execution = tracker.create("flow-1", &request()).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);

        let results = NodeResults::new().with("start", json!({ "success": true }));
        tracker.set_current_node(&execution.id, "start").await.unwrap();
        tracker.save_results(&execution.id, &results).await.unwrap();
        tracker.complete(&execution.id, &results).await.unwrap();

        let stored = tracker.get(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.current_node_id.as_deref(), Some("start"));
        assert_eq!(stored.node_results["start"]["success"], json!(true));
        assert_eq!(stored.input_data["patient"]["name"], json!("Ana"));
        assert_eq!(stored.triggered_by_type.as_deref(), Some("staff"));
        assert!(stored.completed_at.is_some());
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn fail_captures_message_and_stack() {
        let tracker = tracker().await;
        let execution = tracker.create("flow-1", &request()).await.unwrap();

        tracker
            .fail(&execution.id, &NodeResults::new(), "node 'x' failed: boom", "boom\ncaused by")
            .await
            .unwrap();

        let stored = tracker.get(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("node 'x' failed: boom"));
        assert!(stored.error_stack.unwrap().contains("caused by"));
    }

    #[tokio::test]
    async fn logs_come_back_in_order() {
        let tracker = tracker().await;
        let execution = tracker.create("flow-1", &request()).await.unwrap();

        tracker
            .log(&execution.id, None, LogLevel::Info, "started", json!({}))
            .await
            .unwrap();
        tracker
            .log(&execution.id, Some("a"), LogLevel::Error, "failed", json!({ "error": "boom" }))
            .await
            .unwrap();

        let logs = tracker.logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "started");
        assert_eq!(logs[1].level, LogLevel::Error);
        assert_eq!(logs[1].node_id.as_deref(), Some("a"));
        assert_eq!(logs[1].data["error"], json!("boom"));

        assert!(tracker.get("missing").await.unwrap().is_none());
    }
}
