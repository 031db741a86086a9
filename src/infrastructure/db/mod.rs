pub mod postgres;

use crate::domain::error::Result;
use crate::domain::session::RowSet;
use async_trait::async_trait;

/// Relational database client. Connection lifecycle is owned externally; the
/// core treats the pool as a capacity-limited resource and must see a
/// `Connection` error promptly when it is exhausted rather than block.
#[async_trait]
pub trait DatabaseClient {
    /// Run a SELECT and return at most `limit` rows; failures come back as
    /// `AppError::Execution` with a classified kind.
    async fn run(&self, sql: &str, limit: usize) -> Result<RowSet>;
}
