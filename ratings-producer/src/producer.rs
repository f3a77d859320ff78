use std::time::Duration;

use chrono::Utc;
use common_metrics::timing_guard;
use health::HealthHandle;
use ratings_common::retry::RetryPolicy;
use ratings_common::types::RatingEvent;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::generator::RatingGenerator;
use crate::metrics_consts::{
    CYCLES_COMPLETED, CYCLE_TIME, EVENTS_PUBLISHED, PUBLISH_FAILURES, PUBLISH_RETRIES,
};
use crate::publisher::{EventPublisher, PublishError};

/// Publishes `batch_size` events back to back, then sleeps for `interval`.
pub struct ProducerLoop<P> {
    publisher: P,
    generator: RatingGenerator,
    batch_size: usize,
    interval: Duration,
    retry_policy: RetryPolicy,
    liveness: HealthHandle,
}

impl<P: EventPublisher> ProducerLoop<P> {
    pub fn new(
        publisher: P,
        generator: RatingGenerator,
        batch_size: usize,
        interval: Duration,
        retry_policy: RetryPolicy,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            publisher,
            generator,
            batch_size,
            interval,
            retry_policy,
            liveness,
        }
    }

    /// Runs until `shutdown` is cancelled. An event that could not be
    /// published within the retry policy is fatal.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), PublishError> {
        info!(
            batch_size = self.batch_size,
            interval_secs = self.interval.as_secs(),
            "starting producer loop"
        );

        loop {
            self.liveness.report_healthy();

            let cycle_time = timing_guard(CYCLE_TIME);
            self.run_cycle(&shutdown).await?;
            cycle_time.fin();
            metrics::counter!(CYCLES_COMPLETED).increment(1);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("producer loop stopped, flushing pending messages");
        self.publisher.flush().await
    }

    async fn run_cycle(&mut self, shutdown: &CancellationToken) -> Result<(), PublishError> {
        for _ in 0..self.batch_size {
            if shutdown.is_cancelled() {
                break;
            }

            let event = self.generator.next_event(Utc::now());
            self.publish_with_retry(&event, shutdown).await?;
        }

        Ok(())
    }

    async fn publish_with_retry(
        &self,
        event: &RatingEvent,
        shutdown: &CancellationToken,
    ) -> Result<(), PublishError> {
        let mut failed_attempts = 0;

        loop {
            let error = match self.publisher.publish(event).await {
                Ok(()) => {
                    metrics::counter!(EVENTS_PUBLISHED).increment(1);
                    info!(
                        user = %event.name,
                        movie = %event.movie,
                        rating = event.rating,
                        timestamp = %event.timestamp,
                        "sent rating event"
                    );
                    return Ok(());
                }
                Err(error) => error,
            };

            failed_attempts += 1;
            if !error.is_retryable() || !self.retry_policy.should_retry(failed_attempts) {
                metrics::counter!(PUBLISH_FAILURES).increment(1);
                error!(
                    attempts = failed_attempts,
                    "giving up publishing rating event: {}", error
                );
                return Err(error);
            }

            let backoff = self.retry_policy.retry_interval(failed_attempts);
            metrics::counter!(PUBLISH_RETRIES).increment(1);
            warn!(
                attempts = failed_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "failed to publish rating event, retrying: {}",
                error
            );

            // A cycle of retried events can outlast the liveness deadline
            self.liveness.report_healthy();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!("shutdown requested while retrying, dropping unpublished event");
                    return Ok(());
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
