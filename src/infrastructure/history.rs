//! History and checkpoint stores
//!
//! The turn log is append-only and keyed by session id; storage format and
//! retention are owned by the collaborator behind the trait. Checkpoints must
//! survive process restarts, so they round-trip through serialized JSON even
//! in the in-memory implementation.

use crate::domain::error::{AppError, Result};
use crate::domain::session::{Checkpoint, TurnRecord, TurnSummary};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a finalized turn to the session's log.
    async fn append_turn(&self, session_id: &str, record: TurnRecord) -> Result<()>;
    /// Most recent question/answer pairs, oldest first.
    async fn conversation(&self, session_id: &str, limit: usize) -> Result<Vec<TurnSummary>>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store the checkpoint; a session may hold at most one.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;
    /// Remove and return the pending checkpoint, if any. Consumption is
    /// exactly-once: a second `take` returns `None`.
    async fn take(&self, session_id: &str) -> Result<Option<Checkpoint>>;
    async fn pending(&self, session_id: &str) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryHistory {
    turns: Mutex<HashMap<String, Vec<TurnRecord>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append_turn(&self, session_id: &str, record: TurnRecord) -> Result<()> {
        let mut turns = self.turns.lock().unwrap();
        turns.entry(session_id.to_string()).or_default().push(record);
        Ok(())
    }

    async fn conversation(&self, session_id: &str, limit: usize) -> Result<Vec<TurnSummary>> {
        let turns = self.turns.lock().unwrap();
        let records = turns.get(session_id).map(|v| v.as_slice()).unwrap_or(&[]);
        let start = records.len().saturating_sub(limit);
        Ok(records[start..]
            .iter()
            .map(|r| TurnSummary {
                question: r.question.clone(),
                answer: r.answer.clone().unwrap_or_default(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCheckpoints {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpoints {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock().unwrap();
        if checkpoints.contains_key(&checkpoint.session_id) {
            return Err(AppError::SessionBusy(format!(
                "Session {} already holds a pending checkpoint",
                checkpoint.session_id
            )));
        }
        checkpoints.insert(checkpoint.session_id.clone(), checkpoint);
        Ok(())
    }

    async fn take(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let mut checkpoints = self.checkpoints.lock().unwrap();
        Ok(checkpoints.remove(session_id))
    }

    async fn pending(&self, session_id: &str) -> Result<bool> {
        let checkpoints = self.checkpoints.lock().unwrap();
        Ok(checkpoints.contains_key(session_id))
    }
}
