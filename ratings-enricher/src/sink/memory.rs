use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ratings_common::types::EnrichedRecord;
use uuid::Uuid;

use super::RatingSink;
use crate::error::SinkError;

/// Keeps rows in memory. Optionally rejects ids it already holds, the way a
/// store with a uniqueness constraint would, and can be told to fail writes.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    rows: Vec<EnrichedRecord>,
    ids: HashSet<Uuid>,
    enforce_unique_ids: bool,
    write_calls: usize,
    failures: VecDeque<SinkError>,
}

impl MemorySink {
    pub fn with_unique_ids() -> Self {
        let sink = MemorySink::default();
        sink.state().enforce_unique_ids = true;
        sink
    }

    /// Stores rows as if a previous batch had written them.
    pub fn preload(&self, rows: Vec<EnrichedRecord>) {
        let mut state = self.state();
        state.ids.extend(rows.iter().map(|row| row.id));
        state.rows.extend(rows);
    }

    /// Fail the next `times` writes with `error`, without storing anything.
    pub fn fail_next(&self, error: SinkError, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.failures.push_back(error.clone());
        }
    }

    pub fn rows(&self) -> Vec<EnrichedRecord> {
        self.state().rows.clone()
    }

    /// Number of `append_batch` calls, failed ones included.
    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RatingSink for MemorySink {
    async fn append_batch(&self, records: &[EnrichedRecord]) -> Result<(), SinkError> {
        let mut state = self.state();
        state.write_calls += 1;

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        if state.enforce_unique_ids {
            let mut batch_ids = HashSet::with_capacity(records.len());
            for record in records {
                if state.ids.contains(&record.id) || !batch_ids.insert(record.id) {
                    return Err(SinkError::DuplicateId(record.id));
                }
            }
        }

        state.ids.extend(records.iter().map(|record| record.id));
        state.rows.extend_from_slice(records);
        Ok(())
    }
}
