//! Query execution
//!
//! Guards the database behind a SELECT-only policy and delegates the actual
//! run to the client behind the trait. Guard rejections are classified as
//! syntax-class execution errors so the workflow treats them like any other
//! rejected statement and regenerates.

use crate::domain::error::{AppError, ExecutionErrorKind, Result};
use crate::domain::session::RowSet;
use crate::infrastructure::db::DatabaseClient;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct QueryExecutorConfig {
    /// Row cap applied to every result set.
    pub max_rows: usize,
}

impl Default for QueryExecutorConfig {
    fn default() -> Self {
        Self { max_rows: 500 }
    }
}

pub struct QueryExecutor {
    db: Arc<dyn DatabaseClient + Send + Sync>,
    config: QueryExecutorConfig,
}

impl QueryExecutor {
    pub fn new(db: Arc<dyn DatabaseClient + Send + Sync>, config: QueryExecutorConfig) -> Self {
        Self { db, config }
    }

    pub async fn execute(&self, sql: &str) -> Result<RowSet> {
        Self::check_select_only(sql)?;
        debug!("Executing SQL ({} chars)", sql.len());
        self.db.run(sql, self.config.max_rows).await
    }

    /// Only SELECT statements are allowed; data-modifying keywords are
    /// blocked even inside an otherwise SELECT-shaped statement.
    fn check_select_only(sql: &str) -> Result<()> {
        let sql_upper = sql.trim().to_uppercase();
        if !sql_upper.starts_with("SELECT") && !sql_upper.starts_with("WITH") {
            return Err(AppError::Execution(
                ExecutionErrorKind::Syntax,
                "Only SELECT queries are allowed".to_string(),
            ));
        }

        let blocked_keywords = [
            "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE",
        ];
        for keyword in blocked_keywords {
            // Word-boundary match so column names like "created_at" pass.
            let found = sql_upper
                .split(|c: char| !c.is_alphanumeric() && c != '_')
                .any(|token| token == keyword);
            if found {
                return Err(AppError::Execution(
                    ExecutionErrorKind::Syntax,
                    format!("Query contains forbidden keyword: {}", keyword),
                ));
            }
        }
        Ok(())
    }
}
