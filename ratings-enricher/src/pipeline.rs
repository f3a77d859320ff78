use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use ratings_common::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::buffer::BatchBuffer;
use crate::enrich::{Enricher, IdGenerator};
use crate::error::PipelineError;
use crate::ingest::{IngestReader, ReaderStats, HEARTBEAT_INTERVAL};
use crate::reference::ReferenceTable;
use crate::sink::dead_letter::DeadLetterWriter;
use crate::sink::RatingSink;
use crate::source::RecordSource;
use crate::trigger::{FlushStats, FlushTrigger};

pub struct PipelineSettings {
    pub flush_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub dead_letter_dir: Option<PathBuf>,
    /// Fixed seed for row ids, random ids otherwise.
    pub id_seed: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            dead_letter_dir: None,
            id_seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub reader: ReaderStats,
    pub flush: FlushStats,
}

/// The ingest reader and the flush trigger around one shared buffer.
pub struct Pipeline {
    reader: IngestReader,
    trigger: FlushTrigger,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RatingSink>,
        reference: Arc<ReferenceTable>,
        settings: PipelineSettings,
        liveness: &HealthRegistry,
    ) -> Result<Self, PipelineError> {
        let dead_letter = match settings.dead_letter_dir {
            Some(path) => Some(
                DeadLetterWriter::new(&path)
                    .map_err(|error| PipelineError::DeadLetterDir { path, error })?,
            ),
            None => None,
        };

        let ids = match settings.id_seed {
            Some(seed) => IdGenerator::seeded(seed),
            None => IdGenerator::default(),
        };
        let buffer = Arc::new(BatchBuffer::new());

        let reader = IngestReader::new(
            source.clone(),
            Enricher::new(reference, ids.clone()),
            buffer.clone(),
            settings.retry_policy.clone(),
            liveness.register("ingest_reader", deadline(HEARTBEAT_INTERVAL * 6)),
        );

        // A tick can be followed by a full round of write retries
        let trigger_deadline = settings.flush_interval * 2 + Duration::from_secs(300);
        let trigger = FlushTrigger::new(
            buffer,
            sink,
            source,
            dead_letter,
            ids,
            settings.flush_interval,
            settings.retry_policy,
            liveness.register("flush_trigger", deadline(trigger_deadline)),
        );

        Ok(Self { reader, trigger })
    }

    /// Runs until `shutdown` is cancelled or either side fails for good.
    ///
    /// On shutdown the reader stops first, then the trigger flushes what is
    /// left. A terminal flush failure stops the reader and is returned with
    /// the fate of the batch it was writing; records read after that batch
    /// are neither written nor committed.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<PipelineReport, PipelineError> {
        let reader_token = shutdown.child_token();
        let reader_stopped = CancellationToken::new();

        let reader = &mut self.reader;
        let trigger = &mut self.trigger;

        let read = async {
            let result = reader.run(reader_token.clone()).await;
            reader_stopped.cancel();
            result
        };
        let flush = async {
            let result = trigger.run(reader_stopped.clone()).await;
            if result.is_err() {
                reader_token.cancel();
            }
            result
        };

        let (read_result, flush_result) = tokio::join!(read, flush);

        let flush_stats = flush_result.inspect_err(|e| {
            error!("pipeline stopped, batch was {}: {}", e.fate(), e);
        })?;
        if let Err(source) = read_result {
            return Err(PipelineError::Source {
                source,
                last_fate: flush_stats.last_fate,
            });
        }

        let report = PipelineReport {
            reader: self.reader.stats().clone(),
            flush: flush_stats,
        };
        info!(?report, "pipeline stopped");
        Ok(report)
    }
}

fn deadline(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
