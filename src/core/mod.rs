pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod logging;
pub mod plugin;
pub mod retry;
