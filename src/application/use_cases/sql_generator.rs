//! SQL generation
//!
//! Builds one SELECT candidate from the planned intent, the retrieved
//! knowledge context and the structured history of SQL already rejected in
//! this turn. Also hosts the result-interpretation pass used by the analyze
//! route.

use crate::application::use_cases::knowledge_store::ScoredItem;
use crate::domain::error::{AppError, Result};
use crate::domain::intent::Intent;
use crate::domain::llm_config::LLMConfig;
use crate::domain::session::{PriorError, RowSet, SqlCandidate};
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::response::{extract_json, extract_sql};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const GENERATOR_SYSTEM_PROMPT: &str = r#"You are an expert PostgreSQL query writer.
Write exactly one SELECT statement answering the question, using only the
tables and columns shown in the provided context. Respond with JSON only:
{"sql": "SELECT ...", "rationale": "one sentence on the approach"}
Rules:
- SELECT statements only, never any statement that modifies data.
- If earlier attempts are listed, their errors explain what to avoid; do not
  repeat a rejected statement."#;

const ANALYST_SYSTEM_PROMPT: &str = r#"You are a data analyst. Given a question,
the SQL that was run and its result rows, answer the question in plain
language. Mention concrete numbers from the rows. Two to four sentences."#;

#[derive(Debug, Deserialize)]
struct GeneratorOutput {
    sql: String,
    #[serde(default)]
    rationale: String,
}

pub struct SqlGenerator {
    llm: Arc<dyn LLMClient + Send + Sync>,
    config: LLMConfig,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LLMClient + Send + Sync>, config: LLMConfig) -> Self {
        Self { llm, config }
    }

    pub async fn generate(
        &self,
        question: &str,
        intent: &Intent,
        context: &[ScoredItem],
        prior_errors: &[PriorError],
    ) -> Result<SqlCandidate> {
        let user = Self::build_prompt(question, intent, context, prior_errors);
        let raw = self.llm.generate(&self.config, GENERATOR_SYSTEM_PROMPT, &user).await?;

        // Prefer the structured payload; models that ignore the JSON contract
        // usually still fence the SQL.
        let candidate = match serde_json::from_str::<GeneratorOutput>(&extract_json(&raw)) {
            Ok(out) => SqlCandidate {
                text: out.sql.trim().to_string(),
                rationale: out.rationale,
            },
            Err(_) => SqlCandidate {
                text: extract_sql(&raw),
                rationale: String::new(),
            },
        };

        if candidate.text.is_empty() {
            return Err(AppError::Model("Generator returned no SQL".to_string()));
        }
        debug!("Generated SQL candidate ({} chars)", candidate.text.len());
        Ok(candidate)
    }

    /// Analyze-route answer: interpret the result rows instead of just
    /// rendering them.
    pub async fn interpret(&self, question: &str, sql: &str, result: &RowSet) -> Result<String> {
        let user = format!(
            "Question: {}\nSQL: {}\nResult:\n{}",
            question,
            sql,
            result.to_table_text(50)
        );
        let answer = self.llm.generate(&self.config, ANALYST_SYSTEM_PROMPT, &user).await?;
        let answer = crate::infrastructure::response::clean_llm_response(&answer);
        if answer.is_empty() {
            return Err(AppError::Model("Analyst returned an empty answer".to_string()));
        }
        Ok(answer)
    }

    fn build_prompt(
        question: &str,
        intent: &Intent,
        context: &[ScoredItem],
        prior_errors: &[PriorError],
    ) -> String {
        let mut prompt = String::new();
        if !context.is_empty() {
            prompt.push_str("Context:\n");
            for scored in context {
                prompt.push_str(&format!("- {}\n", scored.item.text));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("Question: {}\n", question));
        if !intent.entities.is_empty() {
            prompt.push_str(&format!("Entities: {}\n", intent.entities.join(", ")));
        }
        if !intent.constraints.is_empty() {
            prompt.push_str(&format!("Constraints: {}\n", intent.constraints.join("; ")));
        }
        if !prior_errors.is_empty() {
            prompt.push_str("\nEarlier attempts that failed:\n");
            for (i, prior) in prior_errors.iter().enumerate() {
                prompt.push_str(&format!("{}. SQL: {}\n   Error: {}\n", i + 1, prior.sql, prior.error));
            }
        }
        prompt
    }
}
