use async_trait::async_trait;
use ratings_common::types::EnrichedRecord;
use tracing::info;

use super::RatingSink;
use crate::error::SinkError;

/// Logs rows instead of storing them, for local runs without a database.
pub struct PrintSink {}

#[async_trait]
impl RatingSink for PrintSink {
    async fn append_batch(&self, records: &[EnrichedRecord]) -> Result<(), SinkError> {
        let span = tracing::span!(tracing::Level::INFO, "batch of rows", rows = records.len());
        let _enter = span.enter();

        for record in records {
            match serde_json::to_string(record) {
                Ok(row) => info!("row: {row}"),
                Err(_) => info!("row: {record:?}"),
            }
        }

        Ok(())
    }
}
