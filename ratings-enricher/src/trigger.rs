use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common_metrics::timing_guard;
use health::HealthHandle;
use ratings_common::retry::RetryPolicy;
use ratings_common::types::EnrichedRecord;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::buffer::{BatchBuffer, PendingBatch};
use crate::enrich::IdGenerator;
use crate::error::{BatchFate, FlushError, SinkError};
use crate::metrics_consts::{
    BATCHES_DEAD_LETTERED, BATCHES_FLUSHED, BATCHES_LOST, BATCHES_SKIPPED, BATCH_SIZE,
    COMMIT_FAILURES, FLUSH_TIME, ID_REGENERATIONS, ROWS_WRITTEN, TRIGGER_STATE, WRITE_ATTEMPTS,
    WRITE_RETRIES,
};
use crate::sink::dead_letter::DeadLetterWriter;
use crate::sink::RatingSink;
use crate::source::{RecordSource, SourcePosition};

/// Id collisions fixed per batch before they count as failed writes.
const MAX_ID_REGENERATIONS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// Waiting for the next tick
    Idle,
    /// Swapping the buffer
    Draining,
    Writing,
    /// Waiting out the backoff before the next write attempt
    Retrying,
    /// Retries exhausted, the trigger stopped
    Failed,
}

impl TriggerState {
    fn gauge_value(self) -> f64 {
        match self {
            TriggerState::Idle => 0.0,
            TriggerState::Draining => 1.0,
            TriggerState::Writing => 2.0,
            TriggerState::Retrying => 3.0,
            TriggerState::Failed => 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to write, no write was issued.
    Skipped,
    Written { rows: usize, attempts: u32 },
    DeadLettered { rows: usize, path: PathBuf },
}

impl BatchOutcome {
    pub fn fate(&self) -> Option<BatchFate> {
        match self {
            BatchOutcome::Skipped => None,
            BatchOutcome::Written { .. } => Some(BatchFate::FlushedIntact),
            BatchOutcome::DeadLettered { .. } => Some(BatchFate::DeadLettered),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub batches_flushed: u64,
    pub batches_skipped: u64,
    pub batches_dead_lettered: u64,
    pub rows_written: u64,
    /// Fate of the last batch that had rows.
    pub last_fate: Option<BatchFate>,
}

/// Swaps the buffer on a fixed interval and appends each batch to the sink.
///
/// A batch is written as a unit. Failed writes are retried as a whole with
/// backoff. A `DuplicateId` rejection gets the offending row a new id and is
/// retried at once without using up the retry policy, unless the id is not
/// in the batch or the batch already had too many collisions.
/// Once attempts run out the batch goes to the dead-letter writer when there
/// is one, otherwise the trigger fails and reports the batch fate. Source
/// positions are committed only after their batch was written or
/// dead-lettered.
pub struct FlushTrigger {
    buffer: Arc<BatchBuffer>,
    sink: Arc<dyn RatingSink>,
    source: Arc<dyn RecordSource>,
    dead_letter: Option<DeadLetterWriter>,
    ids: IdGenerator,
    interval: Duration,
    retry_policy: RetryPolicy,
    liveness: HealthHandle,
    state: TriggerState,
    next_batch_id: u64,
    stats: FlushStats,
}

impl FlushTrigger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<BatchBuffer>,
        sink: Arc<dyn RatingSink>,
        source: Arc<dyn RecordSource>,
        dead_letter: Option<DeadLetterWriter>,
        ids: IdGenerator,
        interval: Duration,
        retry_policy: RetryPolicy,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            buffer,
            sink,
            source,
            dead_letter,
            ids,
            interval,
            retry_policy,
            liveness,
            state: TriggerState::Idle,
            next_batch_id: 0,
            stats: FlushStats::default(),
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn stats(&self) -> &FlushStats {
        &self.stats
    }

    /// Flushes every `interval` until `stop` is cancelled, then flushes once
    /// more so nothing read before the stop is left behind.
    pub async fn run(&mut self, stop: CancellationToken) -> Result<FlushStats, FlushError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            self.liveness.report_healthy();
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await?;
        }

        info!("flushing remaining records before shutdown");
        self.tick().await?;
        Ok(self.stats.clone())
    }

    /// Swaps the buffer and flushes what it held.
    pub async fn tick(&mut self) -> Result<BatchOutcome, FlushError> {
        self.set_state(TriggerState::Draining);
        let batch = self.buffer.swap();
        self.flush(batch).await
    }

    #[instrument(skip_all, fields(batch_id = self.next_batch_id, rows = batch.len()))]
    pub async fn flush(&mut self, batch: PendingBatch) -> Result<BatchOutcome, FlushError> {
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        let positions = batch.positions();

        if batch.is_empty() {
            metrics::counter!(BATCHES_SKIPPED).increment(1);
            self.stats.batches_skipped += 1;
            self.commit(&positions);
            self.set_state(TriggerState::Idle);
            return Ok(BatchOutcome::Skipped);
        }

        let mut records = batch.into_records();
        let rows = records.len();
        metrics::histogram!(BATCH_SIZE).record(rows as f64);
        let flush_time = timing_guard(FLUSH_TIME);

        let mut attempts = 0;
        let mut failed_attempts = 0;
        let mut regenerations = 0;
        let mut maybe_applied = false;
        let last_error = loop {
            self.set_state(TriggerState::Writing);
            metrics::counter!(WRITE_ATTEMPTS).increment(1);
            attempts += 1;

            let error = match self.sink.append_batch(&records).await {
                Ok(()) => {
                    flush_time.fin();
                    metrics::counter!(BATCHES_FLUSHED).increment(1);
                    metrics::counter!(ROWS_WRITTEN).increment(rows as u64);
                    self.stats.batches_flushed += 1;
                    self.stats.rows_written += rows as u64;
                    self.stats.last_fate = Some(BatchFate::FlushedIntact);
                    info!(batch_id, rows, attempts, "flushed batch");

                    self.commit(&positions);
                    self.set_state(TriggerState::Idle);
                    return Ok(BatchOutcome::Written { rows, attempts });
                }
                Err(error) => error,
            };

            // A collision is not a store failure: only the colliding row
            // changes and the batch goes again right away
            if let SinkError::DuplicateId(id) = &error {
                if regenerations < MAX_ID_REGENERATIONS
                    && regenerate_id(&mut records, *id, &self.ids)
                {
                    regenerations += 1;
                    metrics::counter!(ID_REGENERATIONS).increment(1);
                    warn!(batch_id, %id, "row id already taken, retrying with a new one");
                    continue;
                }
            }

            failed_attempts += 1;
            maybe_applied |= error.is_indeterminate();
            if !self.retry_policy.should_retry(failed_attempts) {
                break error;
            }

            self.set_state(TriggerState::Retrying);
            let backoff = self.retry_policy.retry_interval(failed_attempts);
            metrics::counter!(WRITE_RETRIES).increment(1);
            warn!(
                batch_id,
                attempts = failed_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "failed to write batch, retrying: {}",
                error
            );
            self.liveness.report_healthy();
            tokio::time::sleep(backoff).await;
        };

        self.exhausted(batch_id, records, positions, attempts, maybe_applied, last_error)
            .await
    }

    async fn exhausted(
        &mut self,
        batch_id: u64,
        records: Vec<EnrichedRecord>,
        positions: Vec<SourcePosition>,
        attempts: u32,
        maybe_applied: bool,
        error: SinkError,
    ) -> Result<BatchOutcome, FlushError> {
        let rows = records.len();

        if let Some(dead_letter) = &self.dead_letter {
            match dead_letter.write(batch_id, &records).await {
                Ok(path) => {
                    metrics::counter!(BATCHES_DEAD_LETTERED).increment(1);
                    self.stats.batches_dead_lettered += 1;
                    self.stats.last_fate = Some(BatchFate::DeadLettered);
                    warn!(
                        batch_id,
                        rows, attempts, "write retries exhausted, batch dead-lettered: {}", error
                    );

                    self.commit(&positions);
                    self.set_state(TriggerState::Idle);
                    return Ok(BatchOutcome::DeadLettered { rows, path });
                }
                Err(dead_letter_error) => {
                    error!(batch_id, "failed to dead-letter batch: {}", dead_letter_error);
                }
            }
        }

        let fate = match maybe_applied {
            true => BatchFate::PartiallyFlushed,
            false => BatchFate::Lost,
        };
        if fate == BatchFate::Lost {
            metrics::counter!(BATCHES_LOST).increment(1);
        }
        self.stats.last_fate = Some(fate);
        self.set_state(TriggerState::Failed);
        error!(
            batch_id,
            rows,
            attempts,
            %fate,
            "write retries exhausted: {}",
            error
        );

        Err(FlushError::Exhausted {
            batch_id,
            rows,
            attempts,
            fate,
            source: error,
        })
    }

    fn commit(&self, positions: &[SourcePosition]) {
        if positions.is_empty() {
            return;
        }

        // Records whose positions fail to commit are read again after a
        // restart, which at-least-once delivery allows
        if let Err(e) = self.source.commit(positions) {
            metrics::counter!(COMMIT_FAILURES).increment(1);
            warn!("failed to commit source positions: {}", e);
        }
    }

    fn set_state(&mut self, state: TriggerState) {
        self.state = state;
        metrics::gauge!(TRIGGER_STATE).set(state.gauge_value());
    }
}

/// Gives every row holding `taken` a fresh id. False when no row held it.
fn regenerate_id(
    records: &mut Vec<EnrichedRecord>,
    taken: uuid::Uuid,
    ids: &IdGenerator,
) -> bool {
    let mut found = false;
    *records = std::mem::take(records)
        .into_iter()
        .map(|record| match record.id == taken {
            true => {
                found = true;
                record.with_id(ids.next_id())
            }
            false => record,
        })
        .collect();
    found
}
