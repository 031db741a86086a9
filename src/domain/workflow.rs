//! Workflow graph vocabulary
//!
//! The orchestrator advances a turn through a fixed set of nodes and emits one
//! ordered stream of events per turn. Exactly one terminal event is produced:
//! `Complete`, `Interrupt` or `Error`.

use crate::domain::error::ErrorClass;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Intake,
    Plan,
    Retrieve,
    Generate,
    Execute,
    Validate,
    Refine,
    AwaitHuman,
    Success,
    Failed,
}

impl WorkflowState {
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowState::Intake => "intake",
            WorkflowState::Plan => "plan",
            WorkflowState::Retrieve => "retrieve",
            WorkflowState::Generate => "generate",
            WorkflowState::Execute => "execute",
            WorkflowState::Validate => "validate",
            WorkflowState::Refine => "refine",
            WorkflowState::AwaitHuman => "await_human",
            WorkflowState::Success => "success",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Success | WorkflowState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Intermediate progress from a node.
    Progress,
    /// The turn is parked awaiting human clarification.
    Interrupt { prompt: String },
    /// Terminal success.
    Complete { answer: String, sql: Option<String> },
    /// Terminal failure.
    Error { kind: ErrorClass, message: String },
}

/// One element of the per-turn event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Label of the node that produced the event.
    pub node: String,
    pub content: String,
    pub kind: EventKind,
    pub is_final: bool,
}

impl Event {
    pub fn progress(node: WorkflowState, content: impl Into<String>) -> Self {
        Self {
            node: node.label().to_string(),
            content: content.into(),
            kind: EventKind::Progress,
            is_final: false,
        }
    }

    pub fn interrupt(prompt: String) -> Self {
        Self {
            node: WorkflowState::AwaitHuman.label().to_string(),
            content: prompt.clone(),
            kind: EventKind::Interrupt { prompt },
            is_final: true,
        }
    }

    pub fn complete(answer: String, sql: Option<String>) -> Self {
        Self {
            node: WorkflowState::Success.label().to_string(),
            content: answer.clone(),
            kind: EventKind::Complete { answer, sql },
            is_final: true,
        }
    }

    pub fn error(kind: ErrorClass, message: String) -> Self {
        Self {
            node: WorkflowState::Failed.label().to_string(),
            content: message.clone(),
            kind: EventKind::Error { kind, message },
            is_final: true,
        }
    }
}
