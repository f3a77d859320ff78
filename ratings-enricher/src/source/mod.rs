use async_trait::async_trait;

use crate::error::SourceError;

pub mod kafka;
pub mod memory;

/// Where a record sits on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub partition: i32,
    pub offset: i64,
}

/// A raw record, decoded later so a bad payload still has a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub payload: Option<Vec<u8>>,
    pub position: SourcePosition,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Waits for the next record.
    async fn recv(&self) -> Result<SourceRecord, SourceError>;

    /// Marks every record up to and including each position as handled. A
    /// restarted reader resumes after the last committed position of each
    /// partition.
    fn commit(&self, positions: &[SourcePosition]) -> Result<(), SourceError>;
}
