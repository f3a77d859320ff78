use std::future::ready;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use health::HealthRegistry;
use ratings_common::retry::RetryPolicy;
use ratings_enricher::{
    config::Config,
    pipeline::{Pipeline, PipelineSettings},
    reference::ReferenceTable,
    sink::{print::PrintSink, scylla::ScyllaSink, RatingSink},
    source::kafka::KafkaSource,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
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
    "ratings enricher"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("starting up...");

    let config = Config::init_from_env().context("failed to load configuration from env")?;

    // Loaded once, before anything is read from the bus
    let reference = Arc::new(ReferenceTable::load(Path::new(&config.reference_path))?);

    let liveness = HealthRegistry::new("liveness");

    let consumer = SingleTopicConsumer::new(
        &config.kafka,
        &config.consumer,
        liveness.register("rdkafka", time::Duration::seconds(30)),
    )
    .context("failed to create kafka consumer")?;

    let sink: Arc<dyn RatingSink> = match config.print_sink {
        true => Arc::new(PrintSink {}),
        false => Arc::new(ScyllaSink::connect(&config.scylla).await?),
    };

    let pipeline = Pipeline::new(
        Arc::new(KafkaSource::new(consumer)),
        sink,
        reference,
        PipelineSettings {
            flush_interval: config.flush_interval_secs.0,
            retry_policy: RetryPolicy::from(&config.retry_policy),
            dead_letter_dir: config.dead_letter_dir.as_ref().map(PathBuf::from),
            id_seed: None,
        },
        &liveness,
    )?;

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

    // The error carries the fate of the last batch for the operator
    let result = pipeline.run(shutdown_token.clone()).await;

    shutdown_token.cancel();
    server.await?.context("health server failed")?;

    let report = result?;
    info!(
        batches_flushed = report.flush.batches_flushed,
        rows_written = report.flush.rows_written,
        "enricher stopped"
    );
    Ok(())
}
