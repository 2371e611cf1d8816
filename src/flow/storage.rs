/// SQLite persistence layer for flow definitions
///
/// Flows are stored as a JSON definition column alongside indexed lookup fields.

use crate::flow::types::Flow;
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};

/// SQLite-based flow storage
#[derive(Debug, Clone)]
pub struct FlowStorage {
    pool: SqlitePool,
}

/// A stored flow together with its revision marker
#[derive(Debug, Clone)]
pub struct StoredFlow {
    pub flow: Flow,
    /// `updated_at` of the row; changes on every save
    pub revision: String,
}

/// Basic flow metadata for listing operations
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    /// Unique flow identifier
    pub id: String,
    /// Human-readable flow name
    pub name: String,
    pub is_active: bool,
    /// Creation timestamp (RFC3339)
    pub created_at: String,
    /// Last modification timestamp (RFC3339)
    pub updated_at: String,
}

impl FlowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a flow definition
    pub async fn save_flow(&self, flow: &Flow) -> Result<()> {
        let definition_json = serde_json::to_string(flow)?;
        // Microsecond precision keeps revisions distinct across quick successive saves
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        sqlx::query(
            r#"
            INSERT INTO flows (id, name, is_active, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(flow.is_active)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save flow '{}'", flow.id))?;

        Ok(())
    }

    /// Retrieve a flow by ID
    pub async fn get_flow(&self, id: &str) -> Result<Option<Flow>> {
        Ok(self.get_stored_flow(id).await?.map(|stored| stored.flow))
    }

    /// Retrieve a flow with its revision marker
    pub async fn get_stored_flow(&self, id: &str) -> Result<Option<StoredFlow>> {
        let row = sqlx::query("SELECT definition, updated_at FROM flows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let flow: Flow = serde_json::from_str(&definition_json)
                    .with_context(|| format!("Stored definition of flow '{}' is invalid", id))?;
                Ok(Some(StoredFlow {
                    flow,
                    revision: row.get("updated_at"),
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flows WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// List all flows, most recently updated first
    pub async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, is_active, created_at, updated_at FROM flows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let flows = rows
            .into_iter()
            .map(|row| FlowSummary {
                id: row.get("id"),
                name: row.get("name"),
                is_active: row.get("is_active"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect();

        Ok(flows)
    }

    /// Load every parseable flow for registry warm-up
    ///
    /// Rows whose definition no longer parses are skipped with a warning.
    pub async fn load_all_flows(&self) -> Result<Vec<StoredFlow>> {
        let rows = sqlx::query("SELECT id, definition, updated_at FROM flows")
            .fetch_all(&self.pool)
            .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<Flow>(&definition_json) {
                Ok(flow) => flows.push(StoredFlow {
                    flow,
                    revision: row.get("updated_at"),
                }),
                Err(e) => tracing::warn!("⚠️ Skipping flow '{}' with invalid definition: {}", id, e),
            }
        }

        Ok(flows)
    }

    /// Delete a flow by ID; returns whether a row was removed
    pub async fn delete_flow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
