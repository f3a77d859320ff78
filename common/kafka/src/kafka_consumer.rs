use std::sync::Arc;

use health::HealthHandle;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message};
use tracing::{debug, info};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::kafka_producer::KafkaContext;

/// A raw record as read from the topic: decoding is left to the caller so
/// that a malformed payload never costs us the position it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
}

impl SingleTopicConsumer {
    /// Subscribes to `consumer_config.kafka_consumer_topic`. Offsets are only
    /// committed once stored through `store_offset`, librdkafka commits the
    /// stored offsets in the background and on close.
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(liveness.into())?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        info!(
            "subscribed to topic {} as group {}",
            consumer_config.kafka_consumer_topic, consumer_config.kafka_consumer_group
        );

        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: consumer_config.kafka_consumer_topic.clone(),
            }),
        })
    }

    pub async fn recv(&self) -> Result<ConsumedRecord, KafkaError> {
        let message = self.inner.consumer.recv().await?;

        Ok(ConsumedRecord {
            payload: message.payload().map(<[u8]>::to_vec),
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    /// Store `next_offset` (the offset of the next record to read, not the
    /// last one handled) for the given partition.
    pub fn store_offset(&self, partition: i32, next_offset: i64) -> Result<(), KafkaError> {
        self.inner
            .consumer
            .store_offset(&self.inner.topic, partition, next_offset)
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }
}
