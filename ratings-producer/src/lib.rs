pub mod catalog;
pub mod config;
pub mod generator;
pub mod metrics_consts;
pub mod producer;
pub mod publisher;
