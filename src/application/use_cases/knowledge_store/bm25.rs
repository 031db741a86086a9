use std::collections::{HashMap, HashSet};

/// BM25 scoring parameters
const BM25_K1: f32 = 1.2; // Term frequency saturation
const BM25_B: f32 = 0.75; // Length normalization

/// BM25 scorer over the knowledge corpus, used as the lexical channel of
/// hybrid search. Built fresh from a snapshot per query; the corpus is small
/// enough that index reuse is not worth the staleness.
pub struct Bm25Scorer {
    /// term -> number of documents containing the term
    doc_frequencies: HashMap<String, usize>,
    total_docs: usize,
    avg_doc_len: f32,
}

impl Bm25Scorer {
    pub fn from_documents(documents: &[String]) -> Self {
        let mut doc_frequencies: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;

        for doc in documents {
            let tokens = Self::tokenize(doc);
            let unique_tokens: HashSet<_> = tokens.iter().collect();
            for token in unique_tokens {
                *doc_frequencies.entry(token.clone()).or_insert(0) += 1;
            }
            total_length += tokens.len();
        }

        let avg_doc_len = if documents.is_empty() {
            1.0
        } else {
            total_length as f32 / documents.len() as f32
        };

        Self {
            doc_frequencies,
            total_docs: documents.len(),
            avg_doc_len,
        }
    }

    pub fn score(&self, query: &str, document: &str) -> f32 {
        let query_tokens = Self::tokenize(query);
        let doc_tokens = Self::tokenize(document);
        let doc_len = doc_tokens.len() as f32;

        let mut term_freqs: HashMap<String, usize> = HashMap::new();
        for token in &doc_tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }

        let mut score = 0.0f32;
        for term in &query_tokens {
            let tf = *term_freqs.get(term).unwrap_or(&0) as f32;
            let df = *self.doc_frequencies.get(term).unwrap_or(&0) as f32;

            if tf > 0.0 && df > 0.0 {
                let idf = ((self.total_docs as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();
                let tf_component = (tf * (BM25_K1 + 1.0))
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / self.avg_doc_len)));
                score += idf * tf_component;
            }
        }
        score
    }

    /// Tokenize text into lowercase terms. Snake_case identifiers emit both
    /// the joined token and their parts, so "total" matches "total_amount".
    /// Short tokens are kept because table and column names are often two
    /// characters ("id", "ts").
    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for raw in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
        {
            if raw.is_empty() {
                continue;
            }
            tokens.push(raw.to_string());
            if raw.contains('_') {
                for part in raw.split('_').filter(|s| !s.is_empty()) {
                    tokens.push(part.to_string());
                }
            }
        }
        tokens
    }
}
