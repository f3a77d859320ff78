use std::path::PathBuf;

use chrono::Utc;
use ratings_common::types::EnrichedRecord;
use tracing::warn;

use crate::error::DeadLetterError;

/// Keeps batches the store would not take as JSON-lines files, one file per
/// batch, for manual replay.
#[derive(Debug, Clone)]
pub struct DeadLetterWriter {
    dir: PathBuf,
}

impl DeadLetterWriter {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub async fn write(
        &self,
        batch_id: u64,
        records: &[EnrichedRecord],
    ) -> Result<PathBuf, DeadLetterError> {
        let mut contents = Vec::new();
        for record in records {
            serde_json::to_writer(&mut contents, record)?;
            contents.push(b'\n');
        }

        let path = self.dir.join(format!(
            "batch-{}-{}.jsonl",
            batch_id,
            Utc::now().timestamp_millis()
        ));
        tokio::fs::write(&path, contents).await?;

        warn!(
            batch_id,
            rows = records.len(),
            "dead-lettered batch to {}",
            path.display()
        );
        Ok(path)
    }
}
