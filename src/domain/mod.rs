pub mod error;
pub mod intent;
pub mod knowledge;
pub mod llm_config;
pub mod session;
pub mod workflow;
