use std::future::ready;
use std::path::Path;

use anyhow::Context;
use axum::{routing::get, Router};
use common_kafka::kafka_producer::create_kafka_producer;
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use health::HealthRegistry;
use ratings_common::retry::RetryPolicy;
use ratings_producer::{
    catalog::Catalog, config::Config, generator::RatingGenerator, producer::ProducerLoop,
    publisher::KafkaPublisher,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully...");
}

pub async fn index() -> &'static str {
    "ratings producer"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("starting up...");

    let config = Config::init_from_env().context("failed to load configuration from env")?;

    let catalog = Catalog::load(
        Path::new(&config.movies_path),
        config.producer_names.as_deref(),
    )?;

    let liveness = HealthRegistry::new("liveness");
    // A cycle sleeps for the whole interval, leave room for a slow batch on top
    let loop_deadline = time::Duration::try_from(config.producer_interval_secs.0)?
        + time::Duration::seconds(60);
    let producer_liveness = liveness.register("producer_loop", loop_deadline);
    let kafka_liveness = liveness.register("rdkafka", time::Duration::seconds(30));

    let producer = create_kafka_producer(&config.kafka, kafka_liveness)
        .context("failed to create kafka producer")?;
    let publisher = KafkaPublisher::new(producer, config.kafka_topic.as_str());

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown().await;
        signal_token.cancel();
    });

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router)?;
    let bind = config.bind();
    let server_token = shutdown_token.clone();
    let server = tokio::spawn(async move {
        serve(router, &bind, server_token.cancelled_owned()).await
    });

    let producer_loop = ProducerLoop::new(
        publisher,
        RatingGenerator::new(catalog, config.producer_seed),
        config.producer_batch_size,
        config.producer_interval_secs.0,
        RetryPolicy::from(&config.retry_policy),
        producer_liveness,
    );

    let result = producer_loop.run(shutdown_token.clone()).await;

    shutdown_token.cancel();
    server.await?.context("health server failed")?;

    if let Err(e) = &result {
        error!("producer loop terminated: {}", e);
    }
    result?;

    info!("producer stopped");
    Ok(())
}
