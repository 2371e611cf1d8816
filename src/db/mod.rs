/// SQLite database setup
///
/// Opens the connection pool and creates the engine's own tables:
/// - flows: flow definitions stored as JSON
/// - flow_executions: one row per execution with status and node results
/// - flow_execution_logs: per-execution log stream
///
/// Clinic tables reached by database_query/database_update nodes live in the same
/// database, but the engine tables above are reserved and never exposed to flows.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Tables owned by the engine; data-store nodes may not touch them
pub const RESERVED_TABLES: [&str; 3] = ["flows", "flow_executions", "flow_execution_logs"];

/// Database handle wrapping the shared connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to a SQLite database URL, creating the file and its directory if needed
    ///
    /// URL format: `sqlite://data/clinicflow.db` or `sqlite::memory:`
    pub async fn connect(url: &str) -> Result<Self> {
        if let Some(parent) = database_file(url).and_then(|path| path.parent().map(Path::to_path_buf)) {
            if !parent.as_os_str().is_empty() {
                tracing::info!("📁 Ensuring database directory exists: {}", parent.display());
                std::fs::create_dir_all(&parent)
                    .with_context(|| format!("Failed to create database directory '{}'", parent.display()))?;
            }
        }

        tracing::info!("🗄️ Opening database pool: {}", url);
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL '{}'", url))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database '{}'", url))?;

        let database = Self { pool };
        database.init_schema().await?;
        Ok(database)
    }

    /// In-memory database on a single long-lived connection
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is pinned to one.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let database = Self { pool };
        database.init_schema().await?;
        Ok(database)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create engine tables and indexes; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flow_executions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                context_type TEXT NOT NULL,
                context_id TEXT,
                input_data TEXT NOT NULL,
                current_node_id TEXT,
                node_results TEXT NOT NULL,
                status TEXT NOT NULL,
                triggered_by TEXT,
                triggered_by_type TEXT,
                error_message TEXT,
                error_stack TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flow_execution_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                node_id TEXT,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flows_name ON flows(name)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_flow ON flow_executions(flow_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_execution_logs_execution ON flow_execution_logs(execution_id)")
            .execute(&self.pool)
            .await?;

        tracing::debug!("✅ Database schema initialized");
        Ok(())
    }
}

/// File path behind a `sqlite:` URL, or None for in-memory databases
fn database_file(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        None
    } else {
        Some(Path::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_file_path_from_url() {
        assert_eq!(database_file("sqlite://data/clinic.db"), Some(Path::new("data/clinic.db")));
        assert_eq!(database_file("sqlite:clinic.db?mode=rwc"), Some(Path::new("clinic.db")));
        assert_eq!(database_file("sqlite::memory:"), None);
        assert_eq!(database_file("postgres://localhost/db"), None);
    }

    #[tokio::test]
    async fn in_memory_schema_is_idempotent() {
        let database = Database::in_memory().await.unwrap();
        database.init_schema().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flows")
            .fetch_one(database.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
