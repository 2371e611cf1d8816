/// Generic table access for database_query and database_update nodes
///
/// Filters are column equality checks joined with AND; a JSON null filter becomes `IS NULL`.
/// Table and column names are validated as plain identifiers before being interpolated,
/// and every value goes through a bind parameter.

use crate::db::RESERVED_TABLES;
use crate::flow::types::validate_identifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{
    query::Query,
    sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow},
    Column, Row, TypeInfo, ValueRef,
};

/// Rows returned when a query does not set a limit
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// A resolved table query
#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub table: String,
    pub filters: Map<String, Value>,
    /// Columns to return; empty means all
    pub select: Vec<String>,
    pub limit: Option<u32>,
    pub order_by: Option<String>,
    pub descending: bool,
}

/// A resolved table update
#[derive(Debug, Clone, Default)]
pub struct TableUpdate {
    pub table: String,
    /// Column equality checks; must not be empty
    pub filters: Map<String, Value>,
    /// Column -> new value
    pub updates: Map<String, Value>,
}

/// Relational data store reached by flow nodes
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Fetch matching rows as JSON objects
    async fn query(&self, query: &TableQuery) -> Result<Vec<Value>>;

    /// Apply updates to matching rows; returns the number of rows changed
    async fn update(&self, update: &TableUpdate) -> Result<u64>;
}

/// SQLite implementation over the shared pool
#[derive(Debug, Clone)]
pub struct SqliteDataStore {
    pool: SqlitePool,
}

impl SqliteDataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn query(&self, query: &TableQuery) -> Result<Vec<Value>> {
        check_table(&query.table)?;
        for column in &query.select {
            check_identifier(column)?;
        }

        let columns = if query.select.is_empty() {
            "*".to_string()
        } else {
            query.select.join(", ")
        };
        let (where_clause, filter_values) = where_clause(&query.filters)?;

        let mut sql = format!("SELECT {} FROM {}{}", columns, query.table, where_clause);
        if let Some(order_by) = &query.order_by {
            check_identifier(order_by)?;
            sql.push_str(&format!(" ORDER BY {} {}", order_by, if query.descending { "DESC" } else { "ASC" }));
        }
        sql.push_str(&format!(" LIMIT {}", query.limit.unwrap_or(DEFAULT_QUERY_LIMIT)));

        tracing::debug!("📝 SQL Query: {}", sql);

        let mut statement = sqlx::query(&sql);
        for value in filter_values {
            statement = bind_value(statement, value);
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Query on table '{}' failed", query.table))?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn update(&self, update: &TableUpdate) -> Result<u64> {
        check_table(&update.table)?;
        if update.filters.is_empty() {
            anyhow::bail!("Refusing to update table '{}' without filters", update.table);
        }
        if update.updates.is_empty() {
            anyhow::bail!("No columns to update in table '{}'", update.table);
        }

        let mut assignments = Vec::with_capacity(update.updates.len());
        for column in update.updates.keys() {
            check_identifier(column)?;
            assignments.push(format!("{} = ?", column));
        }
        let (where_clause, filter_values) = where_clause(&update.filters)?;

        let sql = format!("UPDATE {} SET {}{}", update.table, assignments.join(", "), where_clause);
        tracing::debug!("📝 SQL Update: {}", sql);

        let mut statement = sqlx::query(&sql);
        for value in update.updates.values().chain(filter_values) {
            statement = bind_value(statement, value);
        }

        let result = statement
            .execute(&self.pool)
            .await
            .with_context(|| format!("Update on table '{}' failed", update.table))?;

        Ok(result.rows_affected())
    }
}

fn check_identifier(name: &str) -> Result<()> {
    validate_identifier(name).map_err(anyhow::Error::msg)
}

fn check_table(table: &str) -> Result<()> {
    check_identifier(table)?;
    if RESERVED_TABLES.iter().any(|reserved| reserved.eq_ignore_ascii_case(table)) {
        anyhow::bail!("Table '{}' is reserved for the flow engine", table);
    }
    Ok(())
}

/// Build ` WHERE a = ? AND b IS NULL` plus the values to bind, in order
fn where_clause(filters: &Map<String, Value>) -> Result<(String, Vec<&Value>)> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut conditions = Vec::with_capacity(filters.len());
    let mut values = Vec::with_capacity(filters.len());
    for (column, value) in filters {
        check_identifier(column)?;
        if value.is_null() {
            conditions.push(format!("{} IS NULL", column));
        } else {
            conditions.push(format!("{} = ?", column));
            values.push(value);
        }
    }

    Ok((format!(" WHERE {}", conditions.join(" AND ")), values))
}

fn bind_value<'q>(
    statement: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::String(s) => statement.bind(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                statement.bind(i)
            } else if let Some(f) = n.as_f64() {
                statement.bind(f)
            } else {
                statement.bind(n.to_string())
            }
        }
        Value::Bool(b) => statement.bind(*b),
        Value::Null => statement.bind(None::<String>),
        // Arrays and objects are stored as JSON text
        other => statement.bind(other.to_string()),
    }
}

fn row_to_json(row: &SqliteRow) -> Value {
    let record: Map<String, Value> = row
        .columns()
        .iter()
        .map(|column| (column.name().to_string(), column_value(row, column.ordinal())))
        .collect();
    Value::Object(record)
}

/// Decode by the value's storage class, falling back to text
fn column_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).ok().map(Value::from),
        "BOOLEAN" => row.try_get::<bool, _>(index).ok().map(Value::from),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(index).ok().map(Value::from),
        _ => None,
    };

    decoded
        .or_else(|| row.try_get::<String, _>(index).ok().map(Value::from))
        .unwrap_or(Value::Null)
}
