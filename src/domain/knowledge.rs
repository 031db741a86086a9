//! Knowledge base entities
//!
//! A knowledge item is a stored, reusable fragment (schema description, past
//! successful question→SQL pattern, or correction strategy) used to ground SQL
//! generation. Items carry usage statistics and an adaptive weight derived
//! from them; items are never deleted, only decayed toward zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnowledgeKind {
    SchemaFragment,
    QueryPattern,
    CorrectionStrategy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeMetadata {
    /// Source table names referenced by this fragment.
    pub tables: Vec<String>,
    /// Session that produced the item, when learned from a turn.
    pub session_id: Option<String>,
    pub turn_id: Option<Uuid>,
    /// sha256 of the item text; schema ingestion dedups on this.
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub kind: KnowledgeKind,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: KnowledgeMetadata,
    pub usage_count: u64,
    pub success_count: u64,
    /// Derived success ratio in [0, 1]. Never set directly by callers;
    /// recomputed from the counters on every outcome. Retrieval applies the
    /// recency decay on top (see `effective_weight`).
    pub weight: f32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Fold a terminal outcome into the counters and rederive the weight.
    pub fn apply_outcome(&mut self, success: bool, now: DateTime<Utc>) {
        self.usage_count += 1;
        if success {
            self.success_count += 1;
        }
        self.last_used_at = now;
        self.weight =
            (self.success_count as f32 / self.usage_count.max(1) as f32).clamp(0.0, 1.0);
    }

    /// Weight with recency decay applied: stale items lose influence even
    /// without reuse. The half-life is a tunable, not a hidden constant.
    pub fn effective_weight(&self, now: DateTime<Utc>, half_life_days: f32) -> f32 {
        let age_secs = (now - self.last_used_at).num_seconds().max(0) as f32;
        let age_days = age_secs / 86_400.0;
        let decay = 0.5f32.powf(age_days / half_life_days.max(f32::EPSILON));
        (self.weight * decay).clamp(0.0, 1.0)
    }
}

/// Input to `KnowledgeStore::ingest`; the store assigns id, hash, counters
/// and the embedding.
#[derive(Debug, Clone)]
pub struct KnowledgeDraft {
    pub kind: KnowledgeKind,
    pub text: String,
    pub tables: Vec<String>,
    pub session_id: Option<String>,
    pub turn_id: Option<Uuid>,
}

/// Append-only record of a weight update; the stored counters are the
/// reduction of this log, which is retained for replay and debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEvent {
    pub item_id: Uuid,
    pub success: bool,
    pub at: DateTime<Utc>,
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
