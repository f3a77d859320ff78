use envconfig::Envconfig;

use common_kafka::config::KafkaConfig;
use ratings_common::config::{EnvSecsDuration, NonEmptyString, RetryPolicyConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "movies_ratings")]
    pub kafka_topic: NonEmptyString,

    // Header-less CSV, the first column holds the movie titles
    #[envconfig(default = "data/movies.csv")]
    pub movies_path: String,

    // Comma separated, replaces the built-in name pool
    pub producer_names: Option<String>,

    #[envconfig(default = "15")]
    pub producer_batch_size: usize,

    #[envconfig(default = "10")]
    pub producer_interval_secs: EnvSecsDuration,

    // Fixed seed for reproducible runs
    pub producer_seed: Option<u64>,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
