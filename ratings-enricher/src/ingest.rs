use std::sync::Arc;
use std::time::Duration;

use health::HealthHandle;
use ratings_common::retry::RetryPolicy;
use ratings_common::types::{DecodeError, RatingEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::BatchBuffer;
use crate::enrich::Enricher;
use crate::error::SourceError;
use crate::metrics_consts::{
    JOIN_MATCHES, JOIN_MISSES, RECORDS_ENRICHED, RECORDS_RECEIVED, RECV_ERRORS, SCHEMA_DROPS,
};
use crate::source::{RecordSource, SourceRecord};

/// How often an idle reader reports itself alive.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Counts of what the reader did with the records it received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub received: u64,
    pub dropped: u64,
    pub unmatched: u64,
    pub enriched: u64,
}

/// Reads records, decodes and joins them, and hands the rows to the buffer.
pub struct IngestReader {
    source: Arc<dyn RecordSource>,
    enricher: Enricher,
    buffer: Arc<BatchBuffer>,
    retry_policy: RetryPolicy,
    liveness: HealthHandle,
    stats: ReaderStats,
}

impl IngestReader {
    pub fn new(
        source: Arc<dyn RecordSource>,
        enricher: Enricher,
        buffer: Arc<BatchBuffer>,
        retry_policy: RetryPolicy,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            source,
            enricher,
            buffer,
            retry_policy,
            liveness,
            stats: ReaderStats::default(),
        }
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Reads until `shutdown` is cancelled. Malformed records are dropped,
    /// receive errors are retried and only fatal once the retry policy gives
    /// up on consecutive failures.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), SourceError> {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut failed_attempts = 0;

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    self.liveness.report_healthy();
                    continue;
                }
                received = self.source.recv() => received,
            };

            match received {
                Ok(record) => {
                    failed_attempts = 0;
                    self.handle(record);
                }
                Err(e) => {
                    failed_attempts += 1;
                    metrics::counter!(RECV_ERRORS).increment(1);
                    if !self.retry_policy.should_retry(failed_attempts) {
                        error!(
                            attempts = failed_attempts,
                            "giving up reading from the bus: {}", e
                        );
                        return Err(e);
                    }

                    let backoff = self.retry_policy.retry_interval(failed_attempts);
                    warn!(
                        attempts = failed_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "failed to receive record, retrying: {}",
                        e
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(
            received = self.stats.received,
            dropped = self.stats.dropped,
            unmatched = self.stats.unmatched,
            enriched = self.stats.enriched,
            "ingest reader stopped"
        );
        Ok(())
    }

    /// Every record ends up in the buffer, either as rows or as a bare
    /// position, so its offset is committed with the next batch.
    fn handle(&mut self, record: SourceRecord) {
        self.stats.received += 1;
        metrics::counter!(RECORDS_RECEIVED).increment(1);

        let decoded = match &record.payload {
            Some(payload) => RatingEvent::decode(payload),
            None => Err(DecodeError::Empty),
        };

        let event = match decoded {
            Ok(event) => event,
            Err(e) => {
                self.stats.dropped += 1;
                metrics::counter!(SCHEMA_DROPS, "reason" => e.reason()).increment(1);
                warn!(
                    partition = record.position.partition,
                    offset = record.position.offset,
                    "dropping record: {}",
                    e
                );
                self.buffer.mark(record.position);
                return;
            }
        };

        let rows = self.enricher.enrich(&event);
        if rows.is_empty() {
            self.stats.unmatched += 1;
            metrics::counter!(JOIN_MISSES).increment(1);
            debug!(movie = %event.movie, "no reference row for movie");
            self.buffer.mark(record.position);
            return;
        }

        self.stats.enriched += rows.len() as u64;
        metrics::counter!(JOIN_MATCHES).increment(1);
        metrics::counter!(RECORDS_ENRICHED).increment(rows.len() as u64);
        self.buffer.push(rows, record.position);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use health::HealthRegistry;
    use ratings_common::types::ReferenceRecord;

    use super::*;
    use crate::enrich::IdGenerator;
    use crate::reference::ReferenceTable;
    use crate::source::memory::MemorySource;
    use crate::source::SourcePosition;

    fn reader(source: &MemorySource, buffer: Arc<BatchBuffer>) -> IngestReader {
        let reference = ReferenceTable::from_records(vec![ReferenceRecord {
            title: "Inception".to_string(),
            show_id: "S1".to_string(),
            duration: None,
            rating: None,
            release_year: None,
            director: None,
            country: None,
        }]);
        let registry = HealthRegistry::new("liveness");

        IngestReader::new(
            Arc::new(source.clone()),
            Enricher::new(Arc::new(reference), IdGenerator::seeded(1)),
            buffer,
            RetryPolicy::build(1, Duration::from_millis(1))
                .max_attempts(3)
                .provide(),
            registry.register("ingest", time::Duration::seconds(30)),
        )
    }

    fn event(movie: &str) -> RatingEvent {
        RatingEvent {
            name: "Alice".to_string(),
            movie: movie.to_string(),
            rating: 8,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn drops_bad_records_and_keeps_reading() {
        let source = MemorySource::default();
        source.push_event(&event("Inception"));
        source.push(b"{\"name\": \"Bob\"");
        source.push_to(0, None);
        source.push_event(&event("Unknown Movie"));
        source.push_event(&event("Inception"));

        let buffer = Arc::new(BatchBuffer::new());
        let mut reader = reader(&source, buffer.clone());
        let shutdown = CancellationToken::new();

        {
            let run = reader.run(shutdown.clone());
            tokio::pin!(run);
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    tokio::select! {
                        result = &mut run => return result,
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {
                            if source.delivered() == 5 {
                                shutdown.cancel();
                            }
                        }
                    }
                }
            })
            .await
            .expect("reader did not stop")
            .expect("reader failed");
        }
        let stats = reader.stats().clone();

        assert_eq!(
            stats,
            ReaderStats {
                received: 5,
                dropped: 2,
                unmatched: 1,
                enriched: 2,
            }
        );

        let batch = buffer.swap();
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.positions(),
            vec![SourcePosition {
                partition: 0,
                offset: 4
            }]
        );
        assert!(batch.into_records().iter().all(|row| row.show_id == "S1"));
    }

    #[tokio::test]
    async fn keeps_reading_after_transient_receive_errors() {
        let source = MemorySource::default();
        source.fail_next(2);
        source.push_event(&event("Inception"));

        let buffer = Arc::new(BatchBuffer::new());
        let mut reader = reader(&source, buffer.clone());
        let shutdown = CancellationToken::new();

        {
            let run = reader.run(shutdown.clone());
            tokio::pin!(run);
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    tokio::select! {
                        result = &mut run => return result,
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {
                            if source.delivered() == 1 {
                                shutdown.cancel();
                            }
                        }
                    }
                }
            })
            .await
            .expect("reader did not stop")
            .expect("two failures are within the retry policy");
        }

        assert_eq!(reader.stats().enriched, 1);
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_consecutive_receive_errors() {
        let source = MemorySource::default();
        source.push_event(&event("Inception"));

        let buffer = Arc::new(BatchBuffer::new());
        let mut reader = reader(&source, buffer.clone());

        let result = {
            let run = reader.run(CancellationToken::new());
            tokio::pin!(run);
            let mut failing = false;
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    tokio::select! {
                        result = &mut run => return result,
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {
                            if source.delivered() == 1 && !failing {
                                failing = true;
                                source.fail_next(3);
                            }
                        }
                    }
                }
            })
            .await
            .expect("reader did not stop")
        };

        assert!(matches!(result, Err(SourceError::Kafka(_))));
        // What was read before the failures is still buffered
        assert_eq!(reader.stats().received, 1);
        assert_eq!(buffer.len(), 1);
    }
}
