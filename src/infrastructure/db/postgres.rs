//! PostgreSQL executor
//!
//! Runs generated SELECT statements against the target database and maps
//! driver failures onto the execution-error taxonomy. The pool is created
//! with a short acquire timeout so exhaustion surfaces as a `Connection`
//! error instead of queueing indefinitely.

use super::DatabaseClient;
use crate::domain::error::{AppError, ExecutionErrorKind, Result};
use crate::domain::session::RowSet;
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, Pool, Postgres, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct PostgresExecutorConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Default for PostgresExecutorConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 5,
            query_timeout_secs: 30,
        }
    }
}

pub struct PostgresExecutor {
    pool: Pool<Postgres>,
    config: PostgresExecutorConfig,
}

impl PostgresExecutor {
    pub async fn connect(url: &str, config: PostgresExecutorConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                AppError::Execution(
                    ExecutionErrorKind::Connection,
                    format!("Failed to connect to PostgreSQL: {}", e),
                )
            })?;
        info!("Created PostgreSQL connection pool ({} max)", config.max_connections);
        Ok(Self { pool, config })
    }

    /// Map a sqlx error onto the execution-error taxonomy using SQLSTATE
    /// class codes where available.
    fn classify(e: sqlx::Error) -> AppError {
        match &e {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                let kind = match code.as_str() {
                    c if c.starts_with("42501") => ExecutionErrorKind::Permission,
                    c if c.starts_with("42") => ExecutionErrorKind::Syntax,
                    c if c.starts_with("23") => ExecutionErrorKind::Constraint,
                    "57014" => ExecutionErrorKind::Timeout,
                    c if c.starts_with("08") || c.starts_with("53") => {
                        ExecutionErrorKind::Connection
                    }
                    _ => ExecutionErrorKind::Syntax,
                };
                AppError::Execution(kind, db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut => AppError::Execution(
                ExecutionErrorKind::Connection,
                "Connection pool exhausted".to_string(),
            ),
            sqlx::Error::Io(io) => {
                AppError::Execution(ExecutionErrorKind::Connection, io.to_string())
            }
            other => AppError::Execution(ExecutionErrorKind::Connection, other.to_string()),
        }
    }

    /// Extract a column value from a row as serde_json::Value.
    fn extract_column_value(row: &PgRow, index: usize) -> serde_json::Value {
        if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            return v
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        // NUMERIC / DECIMAL, including SUM() and AVG() aggregates.
        if let Ok(v) = row.try_get::<Option<BigDecimal>, _>(index) {
            return v.map(Self::decimal_value).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            return v
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
            return v
                .map(|dt| serde_json::Value::String(dt.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
            return v
                .map(|d| serde_json::Value::String(d.to_string()))
                .unwrap_or(serde_json::Value::Null);
        }
        serde_json::Value::Null
    }

    /// Render a decimal as a JSON number; values outside f64 range fall back
    /// to their exact string form instead of null.
    fn decimal_value(d: BigDecimal) -> serde_json::Value {
        d.to_f64()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(d.to_string()))
    }
}

#[async_trait]
impl DatabaseClient for PostgresExecutor {
    async fn run(&self, sql: &str, limit: usize) -> Result<RowSet> {
        let result = tokio::time::timeout(
            Duration::from_secs(self.config.query_timeout_secs),
            sqlx::query(sql).fetch_all(&self.pool),
        )
        .await
        .map_err(|_| {
            AppError::Execution(
                ExecutionErrorKind::Timeout,
                format!("Query timed out after {} seconds", self.config.query_timeout_secs),
            )
        })?
        .map_err(Self::classify)?;

        let truncated = result.len() > limit;
        let mut rows_json: Vec<HashMap<String, serde_json::Value>> = Vec::new();
        let mut columns: Vec<String> = Vec::new();

        for row in result.iter().take(limit) {
            if columns.is_empty() {
                columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            let mut row_map = HashMap::new();
            for (i, column) in row.columns().iter().enumerate() {
                row_map.insert(column.name().to_string(), Self::extract_column_value(row, i));
            }
            rows_json.push(row_map);
        }

        Ok(RowSet {
            columns,
            rows: rows_json,
            truncated,
        })
    }
}
