//! Intent planning
//!
//! One LLM pass that routes the question (query / analyze / other) and
//! extracts entities, constraints and unresolved ambiguities. Clarifications
//! gathered through a human interrupt are merged into the prompt, so a
//! replanned turn sees everything the user has said so far.

use crate::domain::error::{AppError, Result};
use crate::domain::intent::{Intent, IntentRoute};
use crate::domain::llm_config::LLMConfig;
use crate::domain::session::TurnSummary;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::response::extract_json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a query planning assistant for a SQL copilot.
Classify the user's request and extract its structure. Respond with JSON only:
{
  "route": "query" | "analyze" | "other",
  "entities": ["tables, dimensions or metrics mentioned"],
  "constraints": ["filters, orderings, aggregations the SQL must honor"],
  "ambiguities": ["concepts with no single defensible reading"],
  "expects_rows": true or false,
  "direct_answer": "only for route=other: a short direct reply"
}
Routes: "query" returns data; "analyze" returns data plus interpretation;
"other" is anything not answerable from the database (greetings, meta
questions) and must carry direct_answer.
Only list an ambiguity if the provided clarifications do not resolve it."#;

/// Raw planner output before validation. Kept separate from `Intent` so
/// missing fields default instead of failing deserialization outright.
#[derive(Debug, Deserialize)]
struct PlannerOutput {
    route: IntentRoute,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    constraints: Vec<String>,
    #[serde(default)]
    ambiguities: Vec<String>,
    #[serde(default = "default_expects_rows")]
    expects_rows: bool,
    #[serde(default)]
    direct_answer: Option<String>,
}

fn default_expects_rows() -> bool {
    true
}

pub struct IntentPlanner {
    llm: Arc<dyn LLMClient + Send + Sync>,
    config: LLMConfig,
}

impl IntentPlanner {
    pub fn new(llm: Arc<dyn LLMClient + Send + Sync>, config: LLMConfig) -> Self {
        Self { llm, config }
    }

    pub async fn plan(
        &self,
        question: &str,
        clarifications: &[String],
        conversation: &[TurnSummary],
    ) -> Result<Intent> {
        let user = Self::build_prompt(question, clarifications, conversation);
        let raw = self.llm.generate(&self.config, PLANNER_SYSTEM_PROMPT, &user).await?;
        let parsed: PlannerOutput = serde_json::from_str(&extract_json(&raw))
            .map_err(|e| AppError::Planning(format!("Planner returned malformed JSON: {}", e)))?;

        if parsed.route == IntentRoute::Other && parsed.direct_answer.is_none() {
            return Err(AppError::Planning(
                "Planner chose the direct route without an answer".to_string(),
            ));
        }

        debug!(
            "Planned intent: route={:?}, {} entities, {} ambiguities",
            parsed.route,
            parsed.entities.len(),
            parsed.ambiguities.len()
        );

        Ok(Intent {
            route: parsed.route,
            entities: parsed.entities,
            constraints: parsed.constraints,
            ambiguities: parsed.ambiguities,
            expects_rows: parsed.expects_rows,
            direct_answer: parsed.direct_answer,
        })
    }

    fn build_prompt(
        question: &str,
        clarifications: &[String],
        conversation: &[TurnSummary],
    ) -> String {
        let mut prompt = String::new();
        if !conversation.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for turn in conversation {
                prompt.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("Question: {}\n", question));
        if !clarifications.is_empty() {
            prompt.push_str("User clarifications:\n");
            for c in clarifications {
                prompt.push_str(&format!("- {}\n", c));
            }
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubLLM {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubLLM {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMClient for StubLLM {
        async fn generate(&self, _config: &LLMConfig, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AppError::Model("no scripted response".to_string()))
        }
    }

    fn planner(responses: Vec<&str>) -> (IntentPlanner, Arc<StubLLM>) {
        let llm = Arc::new(StubLLM::new(responses));
        (
            IntentPlanner::new(llm.clone(), LLMConfig::default()),
            llm,
        )
    }

    #[tokio::test]
    async fn test_plan_parses_query_intent() {
        let (planner, _) = planner(vec![
            r#"{"route":"query","entities":["orders"],"constraints":["last month"],"ambiguities":[],"expects_rows":true}"#,
        ]);
        let intent = planner.plan("total orders last month", &[], &[]).await.unwrap();
        assert_eq!(intent.route, IntentRoute::Query);
        assert_eq!(intent.entities, vec!["orders"]);
        assert!(!intent.is_ambiguous());
    }

    #[tokio::test]
    async fn test_plan_tolerates_fenced_json() {
        let (planner, _) = planner(vec![
            "Here is the plan:\n```json\n{\"route\":\"query\",\"entities\":[],\"expects_rows\":false}\n```",
        ]);
        let intent = planner.plan("q", &[], &[]).await.unwrap();
        assert!(!intent.expects_rows);
    }

    #[tokio::test]
    async fn test_malformed_json_is_planning_error() {
        let (planner, _) = planner(vec!["not json at all"]);
        let err = planner.plan("q", &[], &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Planning(_)));
    }

    #[tokio::test]
    async fn test_other_route_requires_direct_answer() {
        let (planner, _) = planner(vec![r#"{"route":"other"}"#]);
        let err = planner.plan("hello", &[], &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Planning(_)));
    }

    #[tokio::test]
    async fn test_clarifications_reach_the_prompt() {
        let (planner, llm) = planner(vec![
            r#"{"route":"query","ambiguities":[]}"#,
        ]);
        planner
            .plan(
                "top products",
                &["top means by revenue".to_string()],
                &[TurnSummary {
                    question: "prior q".to_string(),
                    answer: "prior a".to_string(),
                }],
            )
            .await
            .unwrap();
        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("top means by revenue"));
        assert!(prompt.contains("prior q"));
    }
}
