//! Sessions, turns and interrupt checkpoints
//!
//! A session is one conversation; a turn is one question→answer cycle within
//! it. Turns are mutated only by orchestrator-invoked components and become
//! immutable once terminal, at which point they are appended to the history
//! store.

use crate::domain::intent::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A generated SQL candidate together with the model's reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub text: String,
    pub rationale: String,
}

/// One entry of the structured failure history fed back into regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorError {
    pub sql: String,
    pub error: String,
}

/// Reference to a knowledge item that participated in a turn's retrieval,
/// with the score it was ranked at. Usage/success updates at turn end are
/// applied to exactly this set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedRef {
    pub item_id: Uuid,
    pub score: f32,
}

/// Result rows from a successful execution. `truncated` flags a hit of the
/// row cap; it is not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, serde_json::Value>>,
    pub truncated: bool,
}

impl RowSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Compact textual rendering used both for answers and as LLM context.
    pub fn to_table_text(&self, max_rows: usize) -> String {
        let mut out = String::new();
        out.push_str(&self.columns.join(" | "));
        out.push('\n');
        for row in self.rows.iter().take(max_rows) {
            let line: Vec<String> = self
                .columns
                .iter()
                .map(|c| match row.get(c) {
                    Some(serde_json::Value::Null) | None => "null".to_string(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                })
                .collect();
            out.push_str(&line.join(" | "));
            out.push('\n');
        }
        if self.truncated || self.rows.len() > max_rows {
            out.push_str("... (truncated)\n");
        }
        out
    }
}

/// Mutable working state of one question→answer cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub question: String,
    /// Human clarifications merged in via `resume`, in arrival order.
    pub clarifications: Vec<String>,
    pub intent: Option<Intent>,
    /// Snapshot of the retrieval used for generation.
    pub retrieval: Vec<RetrievedRef>,
    /// Ordered history of generated candidates.
    pub candidates: Vec<SqlCandidate>,
    pub prior_errors: Vec<PriorError>,
    pub result: Option<RowSet>,
    pub answer: Option<String>,
    /// GENERATE↔VALIDATE cycles consumed so far.
    pub semantic_retries: u32,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            clarifications: Vec::new(),
            intent: None,
            retrieval: Vec::new(),
            candidates: Vec::new(),
            prior_errors: Vec::new(),
            result: None,
            answer: None,
            semantic_retries: 0,
            started_at: Utc::now(),
        }
    }

    pub fn latest_sql(&self) -> Option<&str> {
        self.candidates.last().map(|c| c.text.as_str())
    }

    /// True when the model re-emitted SQL that was already rejected in this
    /// turn. The orchestrator escalates immediately instead of spinning.
    pub fn is_rejected_repeat(&self, sql: &str) -> bool {
        self.prior_errors.iter().any(|p| p.sql.trim() == sql.trim())
    }
}

/// Finalized turn as appended to the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub question: String,
    pub sql: Option<String>,
    pub answer: Option<String>,
    pub outcome: TurnOutcome,
    pub retrieval: Vec<RetrievedRef>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Condensed prior turn used as conversation context for planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSummary {
    pub question: String,
    pub answer: String,
}

/// Serialized paused workflow state awaiting human input. Created on
/// suspension, consumed and deleted exactly once on resume; survives process
/// restarts through the checkpoint store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    /// Label of the node to re-enter after resume.
    pub paused_node: String,
    /// JSON-serialized `Turn`.
    pub context: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn for_turn(session_id: &str, paused_node: &str, turn: &Turn) -> crate::domain::error::Result<Self> {
        let context = serde_json::to_string(turn)
            .map_err(|e| crate::domain::error::AppError::Internal(format!("Checkpoint serialization failed: {}", e)))?;
        Ok(Self {
            session_id: session_id.to_string(),
            paused_node: paused_node.to_string(),
            context,
            created_at: Utc::now(),
        })
    }

    pub fn restore_turn(&self) -> crate::domain::error::Result<Turn> {
        serde_json::from_str(&self.context).map_err(|e| {
            crate::domain::error::AppError::Internal(format!(
                "Checkpoint deserialization failed: {}",
                e
            ))
        })
    }
}
