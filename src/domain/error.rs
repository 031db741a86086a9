use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a SQL execution failure, as reported by the database client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    Syntax,
    Permission,
    Constraint,
    Timeout,
    Connection,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionErrorKind::Syntax => write!(f, "syntax"),
            ExecutionErrorKind::Permission => write!(f, "permission"),
            ExecutionErrorKind::Constraint => write!(f, "constraint"),
            ExecutionErrorKind::Timeout => write!(f, "timeout"),
            ExecutionErrorKind::Connection => write!(f, "connection"),
        }
    }
}

/// How the orchestrator should react to an error. This is the single
/// retry/escalate/fail decision input; components never retry on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Retried with backoff, invisible to the user unless retries exhaust.
    Transient,
    /// Retried via the bounded self-correction loop.
    Semantic,
    /// Escalates to a human interrupt, never silently guessed.
    Ambiguity,
    /// Surfaced immediately, no further retries.
    Fatal,
    /// Explicit user/operator abort.
    Cancelled,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Semantic => write!(f, "semantic"),
            ErrorClass::Ambiguity => write!(f, "ambiguity"),
            ErrorClass::Fatal => write!(f, "fatal"),
            ErrorClass::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppError {
    /// Embedding service call failed.
    Embedding(String),
    /// Completion service rejected the call due to rate limiting.
    RateLimited(String),
    /// Completion service call timed out.
    Timeout(String),
    /// Completion service returned an unusable response.
    Model(String),
    /// Planner produced a non-parseable structure.
    Planning(String),
    /// SQL execution failed with a classified cause.
    Execution(ExecutionErrorKind, String),
    /// Generated SQL or its result did not satisfy the resolved intent.
    Semantic(String),
    /// Intent cannot be resolved without human clarification.
    Ambiguous(String),
    /// A turn is already in flight (or parked) for this session.
    SessionBusy(String),
    /// Resume was called without a pending checkpoint.
    NoPendingInterrupt(String),
    /// Caller-supplied input failed validation.
    Validation(String),
    /// Knowledge, checkpoint or history store failure.
    Storage(String),
    /// Explicit abort via the session cancellation signal.
    Cancelled,
    Internal(String),
}

impl AppError {
    /// Map the error onto the orchestrator's retry taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Embedding(_)
            | AppError::RateLimited(_)
            | AppError::Timeout(_)
            | AppError::Model(_)
            | AppError::Planning(_) => ErrorClass::Transient,
            AppError::Execution(kind, _) => match kind {
                ExecutionErrorKind::Syntax | ExecutionErrorKind::Constraint => ErrorClass::Semantic,
                ExecutionErrorKind::Timeout => ErrorClass::Transient,
                ExecutionErrorKind::Permission | ExecutionErrorKind::Connection => {
                    ErrorClass::Fatal
                }
            },
            AppError::Semantic(_) => ErrorClass::Semantic,
            AppError::Ambiguous(_) => ErrorClass::Ambiguity,
            AppError::Cancelled => ErrorClass::Cancelled,
            AppError::SessionBusy(_)
            | AppError::NoPendingInterrupt(_)
            | AppError::Validation(_)
            | AppError::Storage(_)
            | AppError::Internal(_) => ErrorClass::Fatal,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Embedding(msg) => write!(f, "Embedding error: {}", msg),
            AppError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::Model(msg) => write!(f, "Model error: {}", msg),
            AppError::Planning(msg) => write!(f, "Planning error: {}", msg),
            AppError::Execution(kind, msg) => write!(f, "Execution error ({}): {}", kind, msg),
            AppError::Semantic(msg) => write!(f, "Semantic failure: {}", msg),
            AppError::Ambiguous(msg) => write!(f, "Ambiguous intent: {}", msg),
            AppError::SessionBusy(msg) => write!(f, "Session busy: {}", msg),
            AppError::NoPendingInterrupt(msg) => write!(f, "No pending interrupt: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Cancelled => write!(f, "Cancelled"),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

pub type Result<T> = std::result::Result<T, AppError>;
