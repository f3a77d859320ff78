use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ratings_common::types::RatingEvent;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tokio::sync::{mpsc, Notify};

use super::{RecordSource, SourcePosition, SourceRecord};
use crate::error::SourceError;

/// In-process stand-in for the bus. Records pushed by the test are handed
/// out in order, `recv` waits when none are queued. Injected receive
/// failures are returned before any queued record.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

struct Inner {
    sender: mpsc::UnboundedSender<SourceRecord>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<SourceRecord>>,
    next_offsets: Mutex<HashMap<i32, i64>>,
    committed: Mutex<HashMap<i32, i64>>,
    delivered: AtomicUsize,
    failures: AtomicUsize,
    failure_added: Notify,
}

impl Default for MemorySource {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                next_offsets: Mutex::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                delivered: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
                failure_added: Notify::new(),
            }),
        }
    }
}

impl MemorySource {
    pub fn push(&self, payload: &[u8]) -> SourcePosition {
        self.push_to(0, Some(payload.to_vec()))
    }

    pub fn push_event(&self, event: &RatingEvent) -> SourcePosition {
        self.push_to(0, Some(event.encode().unwrap_or_default()))
    }

    /// Appends to `partition`, offsets are assigned per partition from 0.
    pub fn push_to(&self, partition: i32, payload: Option<Vec<u8>>) -> SourcePosition {
        let mut next_offsets = self
            .inner
            .next_offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let offset = next_offsets.entry(partition).or_insert(0);
        let position = SourcePosition {
            partition,
            offset: *offset,
        };
        *offset += 1;

        // The receiving half lives as long as we do
        drop(self.inner.sender.send(SourceRecord { payload, position }));
        position
    }

    /// Last committed offset of `partition`.
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.inner
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&partition)
            .copied()
    }

    /// Fail the next `times` receives with a broker transport error. Wakes
    /// up a `recv` that is already waiting.
    pub fn fail_next(&self, times: usize) {
        self.inner.failures.fetch_add(times, Ordering::SeqCst);
        self.inner.failure_added.notify_one();
    }

    fn take_failure(&self) -> bool {
        self.inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    /// How many records `recv` handed out so far.
    pub fn delivered(&self) -> usize {
        self.inner.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn recv(&self) -> Result<SourceRecord, SourceError> {
        let mut receiver = self.inner.receiver.lock().await;
        loop {
            if self.take_failure() {
                return Err(SourceError::Kafka(KafkaError::MessageConsumption(
                    RDKafkaErrorCode::BrokerTransportFailure,
                )));
            }

            tokio::select! {
                record = receiver.recv() => {
                    let record = record.ok_or(SourceError::Closed)?;
                    self.inner.delivered.fetch_add(1, Ordering::SeqCst);
                    return Ok(record);
                }
                _ = self.inner.failure_added.notified() => {}
            }
        }
    }

    fn commit(&self, positions: &[SourcePosition]) -> Result<(), SourceError> {
        let mut committed = self
            .inner
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for position in positions {
            let current = committed.entry(position.partition).or_insert(position.offset);
            *current = (*current).max(position.offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hands_out_records_in_order() {
        let source = MemorySource::default();
        let first = source.push(b"one");
        let second = source.push_to(3, None);
        let third = source.push(b"three");

        assert_eq!(first.offset, 0);
        assert_eq!(second, SourcePosition { partition: 3, offset: 0 });
        assert_eq!(third.offset, 1);

        assert_eq!(source.recv().await.unwrap().position, first);
        assert_eq!(source.recv().await.unwrap().payload, None);
        assert_eq!(source.recv().await.unwrap().payload.as_deref(), Some(&b"three"[..]));
        assert_eq!(source.delivered(), 3);
    }

    #[tokio::test]
    async fn injected_failures_come_before_queued_records() {
        let source = MemorySource::default();
        source.push(b"one");
        source.fail_next(2);

        assert!(matches!(source.recv().await, Err(SourceError::Kafka(_))));
        assert!(matches!(source.recv().await, Err(SourceError::Kafka(_))));
        assert_eq!(source.recv().await.unwrap().payload.as_deref(), Some(&b"one"[..]));
        assert_eq!(source.delivered(), 1);
    }

    #[tokio::test]
    async fn injected_failures_wake_a_waiting_receive() {
        let source = MemorySource::default();
        let waiting = tokio::spawn({
            let source = source.clone();
            async move { source.recv().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        source.fail_next(1);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), waiting)
            .await
            .expect("receive was not woken up")
            .unwrap();
        assert!(matches!(result, Err(SourceError::Kafka(_))));
    }

    #[test]
    fn commits_never_move_backwards() {
        let source = MemorySource::default();
        assert_eq!(source.committed(0), None);

        source
            .commit(&[SourcePosition { partition: 0, offset: 5 }])
            .unwrap();
        source
            .commit(&[SourcePosition { partition: 0, offset: 2 }])
            .unwrap();

        assert_eq!(source.committed(0), Some(5));
    }
}
