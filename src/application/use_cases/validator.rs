//! Result validation
//!
//! Turns an execution outcome into a workflow verdict. The validator only
//! classifies; whether a retry is actually granted (and how many remain) is
//! the orchestrator's call.

use crate::domain::error::{AppError, ErrorClass};
use crate::domain::intent::Intent;
use crate::domain::session::RowSet;
use tracing::debug;

/// What VALIDATE decided about the executed candidate.
#[derive(Debug)]
pub enum Verdict {
    /// Result answers the question; proceed to the answer.
    Accept(RowSet),
    /// Candidate was wrong in a correctable way; regenerate with this reason
    /// appended to the failure history.
    Retry { sql_error: String },
    /// No defensible automatic next step; ask the human.
    EscalateHuman { prompt: String },
    /// Unrecoverable; fail the turn with this error.
    Fail(AppError),
}

#[derive(Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, outcome: Result<RowSet, AppError>, intent: &Intent) -> Verdict {
        match outcome {
            Ok(rows) => {
                if rows.is_empty() && intent.expects_rows {
                    debug!("Empty result where rows were expected");
                    if intent.is_ambiguous() {
                        // The question itself may be the problem; reframing
                        // beats another blind regeneration.
                        return Verdict::EscalateHuman {
                            prompt: format!(
                                "The query ran but returned nothing. {}",
                                intent.clarification_prompt()
                            ),
                        };
                    }
                    return Verdict::Retry {
                        sql_error: "Query executed successfully but returned no rows; the filters or joins are likely wrong".to_string(),
                    };
                }
                Verdict::Accept(rows)
            }
            Err(err) => match err.class() {
                ErrorClass::Semantic => Verdict::Retry {
                    sql_error: err.to_string(),
                },
                ErrorClass::Ambiguity => Verdict::EscalateHuman {
                    prompt: err.to_string(),
                },
                _ => Verdict::Fail(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ExecutionErrorKind;
    use crate::domain::intent::IntentRoute;
    use std::collections::HashMap;

    fn intent(expects_rows: bool, ambiguities: Vec<&str>) -> Intent {
        Intent {
            route: IntentRoute::Query,
            entities: Vec::new(),
            constraints: Vec::new(),
            ambiguities: ambiguities.into_iter().map(String::from).collect(),
            expects_rows,
            direct_answer: None,
        }
    }

    fn one_row() -> RowSet {
        let mut row = HashMap::new();
        row.insert("n".to_string(), serde_json::json!(1));
        RowSet {
            columns: vec!["n".to_string()],
            rows: vec![row],
            truncated: false,
        }
    }

    #[test]
    fn test_rows_are_accepted() {
        let verdict = Validator::new().assess(Ok(one_row()), &intent(true, vec![]));
        assert!(matches!(verdict, Verdict::Accept(_)));
    }

    #[test]
    fn test_empty_result_with_expected_rows_retries() {
        let verdict = Validator::new().assess(Ok(RowSet::default()), &intent(true, vec![]));
        assert!(matches!(verdict, Verdict::Retry { .. }));
    }

    #[test]
    fn test_empty_result_with_ambiguous_intent_escalates() {
        let verdict = Validator::new().assess(
            Ok(RowSet::default()),
            &intent(true, vec!["what does recent mean"]),
        );
        assert!(matches!(verdict, Verdict::EscalateHuman { .. }));
    }

    #[test]
    fn test_empty_result_accepted_when_rows_not_expected() {
        let verdict = Validator::new().assess(Ok(RowSet::default()), &intent(false, vec![]));
        assert!(matches!(verdict, Verdict::Accept(_)));
    }

    #[test]
    fn test_syntax_error_retries() {
        let err = AppError::Execution(ExecutionErrorKind::Syntax, "bad column".to_string());
        let verdict = Validator::new().assess(Err(err), &intent(true, vec![]));
        assert!(matches!(verdict, Verdict::Retry { .. }));
    }

    #[test]
    fn test_permission_error_fails() {
        let err = AppError::Execution(ExecutionErrorKind::Permission, "denied".to_string());
        let verdict = Validator::new().assess(Err(err), &intent(true, vec![]));
        assert!(matches!(verdict, Verdict::Fail(_)));
    }
}
