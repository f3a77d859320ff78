use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_producer::KafkaContext;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use thiserror::Error;
use tracing::{info_span, instrument, Instrument};

use ratings_common::types::RatingEvent;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to produce to kafka: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to produce to kafka (timeout)")]
    Canceled,
    #[error("publish rejected: {0}")]
    Rejected(String),
}

impl PublishError {
    /// Serialization failures will fail again, anything on the wire may not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Serialization(_))
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Returns once the bus acknowledged the event.
    async fn publish(&self, event: &RatingEvent) -> Result<(), PublishError>;

    /// Drain anything still queued client-side, called on shutdown.
    async fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: &str) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    #[instrument(skip_all)]
    async fn publish(&self, event: &RatingEvent) -> Result<(), PublishError> {
        let payload = event.encode()?;

        // No key: events are spread over partitions, per-partition order is all we promise
        let record = FutureRecord::<(), Vec<u8>>::to(&self.topic).payload(&payload);
        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((error, _)) => return Err(PublishError::Kafka(error)),
        };

        match delivery.instrument(info_span!("ack_wait_one")).await {
            Err(_) => Err(PublishError::Canceled),
            Ok(Err((error, _))) => Err(PublishError::Kafka(error)),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn flush(&self) -> Result<(), PublishError> {
        self.producer.flush(Duration::from_secs(30))?;
        Ok(())
    }
}

/// Keeps published events in memory. Failures can be injected to exercise
/// the retry path.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    events: Arc<Mutex<Vec<RatingEvent>>>,
    failures_remaining: Arc<AtomicUsize>,
}

impl MemoryPublisher {
    pub fn events(&self) -> Vec<RatingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Reject the next `count` publish calls.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: &RatingEvent) -> Result<(), PublishError> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err(PublishError::Rejected("injected failure".to_string()));
        }

        self.events
            .lock()
            .map_err(|_| PublishError::Rejected("poisoned event store".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common_kafka::test::create_mock_kafka;

    use super::*;

    fn event() -> RatingEvent {
        RatingEvent {
            name: "Alice".to_string(),
            movie: "Inception".to_string(),
            rating: 8,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publishes_to_kafka() {
        let (cluster, _, producer) = create_mock_kafka();
        cluster
            .create_topic("movies_ratings", 1, 1)
            .expect("failed to create topic");
        let publisher = KafkaPublisher::new(producer, "movies_ratings");

        // The mock broker may need a moment before accepting writes
        let mut result = publisher.publish(&event()).await;
        for _ in 0..20 {
            if result.is_ok() {
                break;
            }
            result = publisher.publish(&event()).await;
        }
        result.expect("failed to publish to the mock cluster");

        publisher.flush().await.expect("failed to flush");
    }

    #[tokio::test]
    async fn memory_publisher_injects_failures() {
        let publisher = MemoryPublisher::default();
        publisher.fail_next(2);

        assert!(publisher.publish(&event()).await.is_err());
        assert!(publisher.publish(&event()).await.is_err());
        publisher.publish(&event()).await.expect("should succeed");

        assert_eq!(publisher.events().len(), 1);
    }

    #[test]
    fn serialization_errors_are_not_retried() {
        let error = serde_json::from_str::<RatingEvent>("{").unwrap_err();
        assert!(!PublishError::Serialization(error).is_retryable());
        assert!(PublishError::Canceled.is_retryable());
    }
}
