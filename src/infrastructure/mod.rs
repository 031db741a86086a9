pub mod bootstrap;
pub mod db;
pub mod history;
pub mod llm_clients;
pub mod response;
