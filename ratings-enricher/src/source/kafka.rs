use async_trait::async_trait;
use common_kafka::kafka_consumer::SingleTopicConsumer;
use tracing::debug;

use super::{RecordSource, SourcePosition, SourceRecord};
use crate::error::SourceError;

pub struct KafkaSource {
    consumer: SingleTopicConsumer,
}

impl KafkaSource {
    pub fn new(consumer: SingleTopicConsumer) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn recv(&self) -> Result<SourceRecord, SourceError> {
        let record = self.consumer.recv().await?;

        Ok(SourceRecord {
            payload: record.payload,
            position: SourcePosition {
                partition: record.partition,
                offset: record.offset,
            },
        })
    }

    fn commit(&self, positions: &[SourcePosition]) -> Result<(), SourceError> {
        for position in positions {
            // Kafka expects the offset of the next record to consume
            self.consumer
                .store_offset(position.partition, position.offset + 1)?;
            debug!(
                topic = self.consumer.topic(),
                partition = position.partition,
                offset = position.offset,
                "stored offset"
            );
        }
        Ok(())
    }
}
