pub mod config;
pub mod retry;
pub mod types;
