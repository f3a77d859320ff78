pub mod buffer;
pub mod config;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod metrics_consts;
pub mod pipeline;
pub mod reference;
pub mod sink;
pub mod source;
pub mod trigger;
