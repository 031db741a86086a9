//! Structured intent
//!
//! What the user's question is asking for: entities, filters/constraints and
//! any concepts the planner could not resolve without clarification.

use serde::{Deserialize, Serialize};

/// Coarse routing decision made while planning. `Other` short-circuits the
/// SQL pipeline and answers directly; `Analyze` adds an interpretation pass
/// over the query result before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentRoute {
    Query,
    Analyze,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub route: IntentRoute,
    /// Business entities the question refers to (tables, dimensions, metrics).
    pub entities: Vec<String>,
    /// Filters, orderings and aggregations the SQL must honor.
    pub constraints: Vec<String>,
    /// Concepts with no single defensible reading ("recent", "top", ...).
    pub ambiguities: Vec<String>,
    /// Whether the question implies a non-empty result set.
    pub expects_rows: bool,
    /// Direct answer for the `Other` route; no SQL is generated.
    pub direct_answer: Option<String>,
}

impl Intent {
    pub fn is_ambiguous(&self) -> bool {
        !self.ambiguities.is_empty()
    }

    /// Human-facing clarification prompt built from the open ambiguities.
    pub fn clarification_prompt(&self) -> String {
        format!(
            "Please clarify the following before I can build the query: {}",
            self.ambiguities.join("; ")
        )
    }
}
