use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ratings_common::types::EnrichedRecord;

use crate::source::SourcePosition;

/// Everything read since the last swap: the enriched rows to write, and per
/// partition the highest position handled, rows or not.
#[derive(Debug, Default)]
pub struct PendingBatch {
    records: Vec<EnrichedRecord>,
    positions: HashMap<i32, i64>,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Positions to commit once the batch is durably handled, one per
    /// partition, ordered by partition.
    pub fn positions(&self) -> Vec<SourcePosition> {
        let mut positions: Vec<SourcePosition> = self
            .positions
            .iter()
            .map(|(&partition, &offset)| SourcePosition { partition, offset })
            .collect();
        positions.sort_by_key(|position| position.partition);
        positions
    }

    pub fn into_records(self) -> Vec<EnrichedRecord> {
        self.records
    }

    fn advance(&mut self, position: SourcePosition) {
        let offset = self
            .positions
            .entry(position.partition)
            .or_insert(position.offset);
        *offset = (*offset).max(position.offset);
    }
}

/// The hand-off between the ingest reader and the flush trigger. The reader
/// appends to the active batch; the trigger swaps it for an empty one. Both
/// happen under one lock, so a record lands in exactly one batch.
#[derive(Debug, Default)]
pub struct BatchBuffer {
    active: Mutex<PendingBatch>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the rows enriched from the record at `position`.
    pub fn push(&self, records: Vec<EnrichedRecord>, position: SourcePosition) {
        let mut active = self.lock();
        active.records.extend(records);
        active.advance(position);
    }

    /// Records a handled position that produced no rows, so that it is
    /// committed along with the next batch.
    pub fn mark(&self, position: SourcePosition) {
        self.lock().advance(position);
    }

    /// Takes the active batch, leaving an empty one in its place.
    pub fn swap(&self) -> PendingBatch {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PendingBatch> {
        // Every update leaves the batch consistent, a panicking holder cannot
        // corrupt it
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
