use std::fmt;
use std::path::PathBuf;

use rdkafka::error::KafkaError;
use thiserror::Error;
use uuid::Uuid;

/// Failures loading the reference dataset. Fatal at startup.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("failed to open reference dataset {path}: {error}")]
    Open { path: String, error: std::io::Error },
    #[error("failed to read reference dataset: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures reading from, or committing positions to, the bus.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("record source closed")]
    Closed,
}

/// Failures appending a batch to the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The store enforces id uniqueness and `0` is already taken.
    #[error("row id {0} already exists")]
    DuplicateId(Uuid),
    /// The write was not applied.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The write may or may not have been applied, e.g. a write timeout.
    #[error("write outcome unknown: {0}")]
    Indeterminate(String),
    #[error("invalid sink configuration: {0}")]
    Config(String),
}

impl SinkError {
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, SinkError::Indeterminate(_))
    }
}

#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("failed to write dead-letter file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize dead-lettered record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What happened to a batch, reported whenever a flush ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFate {
    /// Every row was acknowledged by the store.
    FlushedIntact,
    /// The store was not reached but the rows were kept in a dead-letter file.
    DeadLettered,
    /// Some attempt ended with an unknown outcome, rows may have been written.
    PartiallyFlushed,
    /// No attempt reached the store and the rows were not kept anywhere.
    Lost,
}

impl fmt::Display for BatchFate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fate = match self {
            BatchFate::FlushedIntact => "flushed intact",
            BatchFate::DeadLettered => "dead-lettered",
            BatchFate::PartiallyFlushed => "partially flushed",
            BatchFate::Lost => "lost",
        };
        f.write_str(fate)
    }
}

/// Terminal failure of the flush trigger.
#[derive(Error, Debug)]
pub enum FlushError {
    #[error("batch {batch_id} with {rows} rows was {fate} after {attempts} write attempts: {source}")]
    Exhausted {
        batch_id: u64,
        rows: usize,
        attempts: u32,
        fate: BatchFate,
        source: SinkError,
    },
}

impl FlushError {
    pub fn fate(&self) -> BatchFate {
        match self {
            FlushError::Exhausted { fate, .. } => *fate,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Flush(#[from] FlushError),
    #[error("reading from the bus failed, last batch was {}: {source}", fate_or_none(.last_fate))]
    Source {
        source: SourceError,
        last_fate: Option<BatchFate>,
    },
    #[error("failed to prepare dead-letter directory {path}: {error}")]
    DeadLetterDir { path: PathBuf, error: std::io::Error },
}

fn fate_or_none(fate: &Option<BatchFate>) -> String {
    match fate {
        Some(fate) => fate.to_string(),
        None => "never flushed".to_string(),
    }
}
