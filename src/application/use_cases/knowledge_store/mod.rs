//! Adaptive knowledge store
//!
//! Persistent collection of knowledge items (schema fragments, past
//! question→SQL patterns, correction strategies) with embeddings, usage
//! statistics and adaptive weights. Exposes hybrid search:
//! vector-similarity and BM25 recall, unioned and reranked by
//! relevance × adaptive weight.
//!
//! Concurrency: the item map is read-mostly; every item is wrapped in its own
//! mutex so weight updates from concurrent turns are serialized per item and
//! never lost, while searches snapshot without blocking writers for long.

pub mod bm25;

use crate::application::use_cases::reranker::Reranker;
use crate::domain::error::Result;
use crate::domain::knowledge::{
    content_hash, KnowledgeDraft, KnowledgeItem, KnowledgeMetadata, WeightEvent,
};
use crate::domain::session::RetrievedRef;
use crate::infrastructure::llm_clients::EmbeddingClient;
use bm25::Bm25Scorer;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct KnowledgeStoreConfig {
    /// Candidates fetched by the vector channel.
    pub vector_k: usize,
    /// Candidates fetched by the lexical channel.
    pub lexical_k: usize,
    /// Half-life of the recency decay applied to adaptive weights, in days.
    pub half_life_days: f32,
}

impl Default for KnowledgeStoreConfig {
    fn default() -> Self {
        Self {
            vector_k: 10,
            lexical_k: 10,
            half_life_days: 30.0,
        }
    }
}

/// A knowledge item with the combined score it was ranked at.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: KnowledgeItem,
    pub score: f32,
}

impl ScoredItem {
    pub fn as_ref(&self) -> RetrievedRef {
        RetrievedRef {
            item_id: self.item.id,
            score: self.score,
        }
    }
}

pub struct KnowledgeStore {
    embedder: Arc<dyn EmbeddingClient + Send + Sync>,
    items: RwLock<HashMap<Uuid, Arc<Mutex<KnowledgeItem>>>>,
    /// Content hashes of ingested items, for idempotent schema ingestion.
    hashes: Mutex<HashMap<String, Uuid>>,
    /// Append-only weight update log, retained for replay and debugging.
    events: Mutex<Vec<WeightEvent>>,
    reranker: Reranker,
    config: KnowledgeStoreConfig,
}

impl KnowledgeStore {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient + Send + Sync>,
        config: KnowledgeStoreConfig,
    ) -> Self {
        Self {
            embedder,
            items: RwLock::new(HashMap::new()),
            hashes: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            reranker: Reranker::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: Uuid) -> Option<KnowledgeItem> {
        let items = self.items.read().unwrap();
        items.get(&id).map(|slot| slot.lock().unwrap().clone())
    }

    /// Snapshot the weight-event log (oldest first).
    pub fn weight_events(&self) -> Vec<WeightEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Hybrid search: vector + lexical recall, deduped by item id keeping the
    /// max raw score, then reranked by relevance × adaptive weight. Search
    /// never mutates counters, so repeated identical queries with unchanged
    /// weights return identical orderings.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredItem>> {
        let query_vec = self.embedder.embed(query).await?;
        let now = Utc::now();
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        // Vector channel: cosine similarity, top vector_k.
        let mut vector: Vec<(usize, f32)> = snapshot
            .iter()
            .enumerate()
            .map(|(i, item)| (i, Self::cosine_similarity(&query_vec, &item.embedding)))
            .collect();
        Self::sort_channel(&mut vector, &snapshot);
        vector.truncate(self.config.vector_k);

        // Lexical channel: BM25 over item text plus table metadata,
        // normalized by the channel max so both channels share a 0..1 scale.
        let docs: Vec<String> = snapshot.iter().map(Self::lexical_document).collect();
        let scorer = Bm25Scorer::from_documents(&docs);
        let mut lexical: Vec<(usize, f32)> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| (i, scorer.score(query, doc)))
            .collect();
        let max_lexical = lexical.iter().map(|(_, s)| *s).fold(0.0f32, f32::max);
        if max_lexical > 0.0 {
            for (_, s) in lexical.iter_mut() {
                *s /= max_lexical;
            }
        }
        Self::sort_channel(&mut lexical, &snapshot);
        lexical.truncate(self.config.lexical_k);

        // Union, dedup by item id keeping the max of the two raw scores.
        let mut union: HashMap<usize, f32> = HashMap::new();
        for (i, s) in vector.into_iter().chain(lexical.into_iter()) {
            let entry = union.entry(i).or_insert(f32::MIN);
            *entry = entry.max(s);
        }

        let candidates: Vec<(KnowledgeItem, f32)> = union
            .into_iter()
            .map(|(i, s)| (snapshot[i].clone(), s))
            .collect();

        let mut ranked =
            self.reranker
                .rerank(query, candidates, now, self.config.half_life_days);
        ranked.truncate(k);

        debug!(
            "Knowledge search returned {} items for query ({} in store)",
            ranked.len(),
            snapshot.len()
        );
        Ok(ranked)
    }

    /// Append a new knowledge item learned from a turn. The embedding is
    /// computed here; on embedding failure the ingest is dropped by the
    /// caller (knowledge-base writes never block user-visible success).
    pub async fn ingest(&self, draft: KnowledgeDraft) -> Result<Uuid> {
        let embedding = self.embedder.embed(&draft.text).await?;
        let hash = content_hash(&draft.text);
        let now = Utc::now();
        let item = KnowledgeItem {
            id: Uuid::new_v4(),
            kind: draft.kind,
            text: draft.text,
            embedding,
            metadata: KnowledgeMetadata {
                tables: draft.tables,
                session_id: draft.session_id,
                turn_id: draft.turn_id,
                content_hash: hash.clone(),
            },
            usage_count: 1,
            success_count: 1,
            weight: 1.0,
            created_at: now,
            last_used_at: now,
        };
        let id = item.id;
        {
            let mut items = self.items.write().unwrap();
            items.insert(id, Arc::new(Mutex::new(item)));
        }
        self.hashes.lock().unwrap().entry(hash).or_insert(id);
        info!("Ingested knowledge item {}", id);
        Ok(id)
    }

    /// Bulk schema ingestion for initial setup. Idempotent by content hash:
    /// re-ingesting identical text is a no-op and returns the existing id.
    pub async fn ingest_schema(&self, fragments: Vec<KnowledgeDraft>) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(fragments.len());
        for draft in fragments {
            let hash = content_hash(&draft.text);
            let existing = self.hashes.lock().unwrap().get(&hash).copied();
            if let Some(id) = existing {
                debug!("Schema fragment already ingested, skipping ({})", id);
                ids.push(id);
                continue;
            }
            ids.push(self.ingest(draft).await?);
        }
        Ok(ids)
    }

    /// Fold a terminal turn outcome into every retrieved item. Updates to the
    /// same item are serialized by its mutex; distinct items update
    /// independently.
    pub fn record_outcomes(&self, refs: &[RetrievedRef], success: bool) {
        let now = Utc::now();
        let mut seen: HashSet<Uuid> = HashSet::new();
        for r in refs {
            if !seen.insert(r.item_id) {
                continue;
            }
            let slot = {
                let items = self.items.read().unwrap();
                items.get(&r.item_id).cloned()
            };
            match slot {
                Some(slot) => {
                    let mut item = slot.lock().unwrap();
                    item.apply_outcome(success, now);
                }
                None => {
                    warn!("Outcome for unknown knowledge item {}", r.item_id);
                    continue;
                }
            }
            self.events.lock().unwrap().push(WeightEvent {
                item_id: r.item_id,
                success,
                at: now,
            });
        }
    }

    fn snapshot(&self) -> Vec<KnowledgeItem> {
        let items = self.items.read().unwrap();
        let mut out: Vec<KnowledgeItem> =
            items.values().map(|slot| slot.lock().unwrap().clone()).collect();
        // Stable base order so channel truncation is deterministic.
        out.sort_by_key(|item| item.id);
        out
    }

    fn lexical_document(item: &KnowledgeItem) -> String {
        if item.metadata.tables.is_empty() {
            item.text.clone()
        } else {
            format!("{} {}", item.text, item.metadata.tables.join(" "))
        }
    }

    /// Sort a recall channel by score descending with a deterministic id
    /// tiebreak against the snapshot order.
    fn sort_channel(channel: &mut [(usize, f32)], snapshot: &[KnowledgeItem]) {
        channel.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| snapshot[a.0].id.cmp(&snapshot[b.0].id))
        });
    }

    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot_product / (norm_a * norm_b)
        }
    }
}
