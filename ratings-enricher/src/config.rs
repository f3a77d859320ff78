use envconfig::Envconfig;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use ratings_common::config::{EnvMsDuration, EnvSecsDuration, RetryPolicyConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    // CSV with a header row, joined on its `title` column
    #[envconfig(default = "data/netflix.csv")]
    pub reference_path: String,

    #[envconfig(default = "30")]
    pub flush_interval_secs: EnvSecsDuration,

    // Log rows instead of writing them to the store
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(nested = true)]
    pub scylla: ScyllaConfig,

    // Batches that exhaust their write retries land here. Unset means such a
    // batch stops the pipeline.
    pub dead_letter_dir: Option<String>,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ScyllaConfig {
    #[envconfig(default = "localhost:9042")]
    pub scylla_host: String,

    #[envconfig(default = "netflix")]
    pub scylla_keyspace: String,

    #[envconfig(default = "movie_ratings")]
    pub scylla_table: String,

    #[envconfig(default = "1")]
    pub scylla_replication_factor: u32,

    #[envconfig(default = "5000")]
    pub scylla_connection_timeout_ms: EnvMsDuration,
}
