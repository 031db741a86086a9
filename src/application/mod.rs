pub mod use_cases;

pub use use_cases::intent_planner::IntentPlanner;
pub use use_cases::knowledge_store::{KnowledgeStore, KnowledgeStoreConfig, ScoredItem};
pub use use_cases::orchestrator::{OrchestratorConfig, WorkflowOrchestrator};
pub use use_cases::query_executor::{QueryExecutor, QueryExecutorConfig};
pub use use_cases::reranker::Reranker;
pub use use_cases::sql_generator::SqlGenerator;
pub use use_cases::validator::{Validator, Verdict};
