pub mod intent_planner;
pub mod knowledge_store;
pub mod orchestrator;
pub mod query_executor;
pub mod reranker;
pub mod sql_generator;
pub mod validator;
