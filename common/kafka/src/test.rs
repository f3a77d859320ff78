use health::HealthRegistry;
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer};

use crate::config::KafkaConfig;
use crate::kafka_producer::{create_kafka_producer, KafkaContext};

/// Spin up a single-broker in-process cluster and a producer pointed at it.
pub fn create_mock_kafka() -> (
    MockCluster<'static, DefaultProducerContext>,
    KafkaConfig,
    FutureProducer<KafkaContext>,
) {
    let registry = HealthRegistry::new("liveness");
    let handle = registry.register("rdkafka", time::Duration::seconds(30));
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");

    let config = KafkaConfig {
        kafka_hosts: cluster.bootstrap_servers(),
        kafka_tls: false,
        kafka_producer_linger_ms: 0,
        kafka_producer_queue_mib: 50,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "gzip".to_string(),
    };

    let producer =
        create_kafka_producer(&config, handle).expect("failed to create mocked kafka producer");

    (cluster, config, producer)
}
