//! sqlpilot: a natural-language to SQL workflow engine.
//!
//! A turn runs through a fixed node graph: intake → plan → retrieve →
//! generate → execute → validate, with a bounded self-correction loop and
//! human-in-the-loop interrupts for ambiguous questions. Retrieval is backed
//! by an adaptive knowledge base whose items are reweighted by the outcome of
//! every turn that used them.
//!
//! Entry point is [`WorkflowOrchestrator`]: construct it with an LLM client,
//! an embedding client, a database client and the stores, then drive it with
//! `submit` / `resume` / `cancel` and consume the per-turn event stream.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::use_cases::knowledge_store::{KnowledgeStore, KnowledgeStoreConfig};
pub use application::use_cases::orchestrator::{OrchestratorConfig, WorkflowOrchestrator};
pub use application::use_cases::query_executor::QueryExecutorConfig;
pub use domain::error::{AppError, ErrorClass, ExecutionErrorKind, Result};
pub use domain::intent::{Intent, IntentRoute};
pub use domain::knowledge::{KnowledgeDraft, KnowledgeItem, KnowledgeKind};
pub use domain::llm_config::LLMConfig;
pub use domain::session::{RowSet, Turn, TurnOutcome, TurnRecord};
pub use domain::workflow::{Event, EventKind, WorkflowState};
pub use infrastructure::bootstrap::init_tracing;
pub use infrastructure::db::postgres::{PostgresExecutor, PostgresExecutorConfig};
pub use infrastructure::db::DatabaseClient;
pub use infrastructure::history::{
    CheckpointStore, HistoryStore, InMemoryCheckpoints, InMemoryHistory,
};
pub use infrastructure::llm_clients::openai::{OpenAIClient, OpenAIEmbeddingClient};
pub use infrastructure::llm_clients::{EmbeddingClient, LLMClient};
