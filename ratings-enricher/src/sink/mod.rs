use async_trait::async_trait;
use ratings_common::types::EnrichedRecord;

use crate::error::SinkError;

pub mod dead_letter;
pub mod memory;
pub mod print;
pub mod scylla;

/// An append-only table of enriched rows.
#[async_trait]
pub trait RatingSink: Send + Sync {
    /// Appends `records` in one write. The store applies all of them or none,
    /// except when the outcome is reported as indeterminate.
    async fn append_batch(&self, records: &[EnrichedRecord]) -> Result<(), SinkError>;
}
