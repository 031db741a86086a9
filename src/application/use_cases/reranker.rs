//! Rerank retrieval candidates by relevance × adaptive weight.
//!
//! Relevance blends a fresh lexical re-score against the query with the raw
//! recall score each candidate arrived with. The adaptive weight carries a
//! recency decay, so stale items sink gradually instead of being cut off.

use crate::application::use_cases::knowledge_store::bm25::Bm25Scorer;
use crate::application::use_cases::knowledge_store::ScoredItem;
use crate::domain::knowledge::KnowledgeItem;
use chrono::{DateTime, Utc};

/// Share of the relevance score contributed by the lexical re-score; the
/// remainder comes from the recall score.
const LEXICAL_BLEND: f32 = 0.5;

#[derive(Default)]
pub struct Reranker;

impl Reranker {
    pub fn new() -> Self {
        Self
    }

    /// Order candidates by `relevance × effective_weight`, descending. Ties
    /// break toward lower usage_count so less-proven items get exposure, then
    /// by id for a fully deterministic order.
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<(KnowledgeItem, f32)>,
        now: DateTime<Utc>,
        half_life_days: f32,
    ) -> Vec<ScoredItem> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let docs: Vec<String> = candidates.iter().map(|(item, _)| item.text.clone()).collect();
        let scorer = Bm25Scorer::from_documents(&docs);
        let lexical: Vec<f32> = docs.iter().map(|doc| scorer.score(query, doc)).collect();
        let lexical = Self::normalize(lexical);

        let mut out: Vec<ScoredItem> = candidates
            .into_iter()
            .zip(lexical)
            .map(|((item, recall), lex)| {
                let relevance = LEXICAL_BLEND * lex + (1.0 - LEXICAL_BLEND) * recall.clamp(0.0, 1.0);
                let score = relevance * item.effective_weight(now, half_life_days);
                ScoredItem { item, score }
            })
            .collect();

        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.usage_count.cmp(&b.item.usage_count))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        out
    }

    /// Min-max normalize to 0..1. When all scores are equal (including the
    /// all-zero no-overlap case) everything maps to 0 and ranking falls back
    /// to the recall scores alone.
    fn normalize(scores: Vec<f32>) -> Vec<f32> {
        let mut min_s = f32::INFINITY;
        let mut max_s = f32::NEG_INFINITY;
        for s in &scores {
            if s.is_finite() {
                min_s = min_s.min(*s);
                max_s = max_s.max(*s);
            }
        }
        if !min_s.is_finite() || !max_s.is_finite() || (max_s - min_s) < 1e-6 {
            return vec![0.0; scores.len()];
        }
        let range = max_s - min_s;
        scores
            .into_iter()
            .map(|s| {
                if s.is_finite() {
                    ((s - min_s) / range).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::{KnowledgeKind, KnowledgeMetadata};
    use chrono::Duration;
    use uuid::Uuid;

    fn item(text: &str, weight: f32, usage: u64, age_days: i64) -> KnowledgeItem {
        let now = Utc::now();
        KnowledgeItem {
            id: Uuid::new_v4(),
            kind: KnowledgeKind::QueryPattern,
            text: text.to_string(),
            embedding: vec![1.0, 0.0],
            metadata: KnowledgeMetadata {
                tables: Vec::new(),
                session_id: None,
                turn_id: None,
                content_hash: String::new(),
            },
            usage_count: usage,
            success_count: (weight * usage as f32) as u64,
            weight,
            created_at: now - Duration::days(age_days),
            last_used_at: now - Duration::days(age_days),
        }
    }

    #[test]
    fn test_higher_weight_wins_at_equal_relevance() {
        let strong = item("orders revenue by month", 0.9, 10, 0);
        let weak = item("orders revenue by month", 0.2, 10, 0);
        let strong_id = strong.id;
        let ranked = Reranker::new().rerank(
            "orders revenue",
            vec![(strong, 0.8), (weak, 0.8)],
            Utc::now(),
            30.0,
        );
        assert_eq!(ranked[0].item.id, strong_id);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_stale_item_decays_below_fresh_one() {
        let fresh = item("orders revenue", 0.8, 10, 0);
        let stale = item("orders revenue", 0.8, 10, 90);
        let fresh_id = fresh.id;
        let ranked = Reranker::new().rerank(
            "orders revenue",
            vec![(stale, 0.8), (fresh, 0.8)],
            Utc::now(),
            30.0,
        );
        assert_eq!(ranked[0].item.id, fresh_id);
    }

    #[test]
    fn test_tie_breaks_toward_lower_usage_count() {
        let proven = item("orders", 1.0, 100, 0);
        let newcomer = item("orders", 1.0, 2, 0);
        let newcomer_id = newcomer.id;
        let ranked = Reranker::new().rerank(
            "orders",
            vec![(proven, 0.5), (newcomer, 0.5)],
            Utc::now(),
            30.0,
        );
        assert_eq!(ranked[0].item.id, newcomer_id);
    }

    #[test]
    fn test_no_lexical_overlap_falls_back_to_recall_score() {
        let a = item("inventory by warehouse", 1.0, 1, 0);
        let b = item("shipping delays", 1.0, 1, 0);
        let a_id = a.id;
        let ranked = Reranker::new().rerank(
            "unrelated words entirely",
            vec![(a, 0.9), (b, 0.3)],
            Utc::now(),
            30.0,
        );
        assert_eq!(ranked[0].item.id, a_id);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(Reranker::new()
            .rerank("q", Vec::new(), Utc::now(), 30.0)
            .is_empty());
    }
}
