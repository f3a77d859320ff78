use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use health::HealthRegistry;
use ratings_common::retry::RetryPolicy;
use ratings_common::types::{RatingEvent, ReferenceRecord};
use ratings_enricher::error::{BatchFate, FlushError, PipelineError, SinkError};
use ratings_enricher::pipeline::{Pipeline, PipelineReport, PipelineSettings};
use ratings_enricher::reference::ReferenceTable;
use ratings_enricher::sink::memory::MemorySink;
use ratings_enricher::source::memory::MemorySource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn reference() -> Arc<ReferenceTable> {
    Arc::new(ReferenceTable::from_records(vec![ReferenceRecord {
        title: "Inception".to_string(),
        show_id: "S1".to_string(),
        duration: Some("148 min".to_string()),
        rating: Some("PG-13".to_string()),
        release_year: Some(2010),
        director: Some("Christopher Nolan".to_string()),
        country: Some("United States".to_string()),
    }]))
}

fn rating(name: &str, movie: &str, rating: i32, second: u32) -> RatingEvent {
    RatingEvent {
        name: name.to_string(),
        movie: movie.to_string(),
        rating,
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap(),
    }
}

fn settings(flush_interval: Duration) -> PipelineSettings {
    PipelineSettings {
        flush_interval,
        retry_policy: RetryPolicy::build(1, Duration::from_millis(1))
            .max_attempts(3)
            .provide(),
        dead_letter_dir: None,
        id_seed: Some(42),
    }
}

fn start(
    source: &MemorySource,
    sink: &MemorySink,
    settings: PipelineSettings,
) -> (
    CancellationToken,
    JoinHandle<Result<PipelineReport, PipelineError>>,
) {
    let liveness = HealthRegistry::new("liveness");
    let pipeline = Pipeline::new(
        Arc::new(source.clone()),
        Arc::new(sink.clone()),
        reference(),
        settings,
        &liveness,
    )
    .expect("failed to build pipeline");

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(pipeline.run(shutdown.clone()));
    (shutdown, handle)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for the pipeline");
}

#[tokio::test]
async fn joins_and_writes_matching_events_only() {
    let source = MemorySource::default();
    let sink = MemorySink::with_unique_ids();
    let (shutdown, handle) = start(&source, &sink, settings(Duration::from_millis(50)));

    let alice = rating("Alice", "Inception", 8, 1);
    source.push_event(&alice);
    source.push_event(&rating("Bob", "Unknown Movie", 3, 2));

    // Bob's position is committed along with Alice's batch
    wait_for(|| source.committed(0) == Some(1)).await;

    let rows = sink.rows();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.show_id, "S1");
    assert_eq!(row.name, "Alice");
    assert_eq!(row.movie, "Inception");
    assert_eq!(row.rating_movie, 8);
    assert_eq!(row.timestamp, alice.timestamp);
    assert_eq!(row.rating.as_deref(), Some("PG-13"));
    assert_eq!(row.duration.as_deref(), Some("148 min"));
    assert_eq!(row.release_year, Some(2010));
    assert_eq!(row.director.as_deref(), Some("Christopher Nolan"));
    assert_eq!(row.country.as_deref(), Some("United States"));

    shutdown.cancel();
    let report = handle.await.unwrap().expect("pipeline failed");
    assert_eq!(report.reader.received, 2);
    assert_eq!(report.reader.unmatched, 1);
    assert_eq!(report.flush.rows_written, 1);
    assert_eq!(sink.rows().len(), 1);
}

#[tokio::test]
async fn malformed_records_do_not_block_valid_ones() {
    let source = MemorySource::default();
    let sink = MemorySink::default();
    let (shutdown, handle) = start(&source, &sink, settings(Duration::from_millis(50)));

    source.push_event(&rating("Alice", "Inception", 8, 1));
    source.push(b"not json at all");
    source.push(br#"{"name":"Eve","movie":"Inception","rating":"ten","timestamp":"2024-03-01T12:00:00"}"#);
    source.push_event(&rating("Carol", "Inception", 5, 4));

    wait_for(|| sink.rows().len() == 2 && source.committed(0) == Some(3)).await;

    shutdown.cancel();
    let report = handle.await.unwrap().expect("pipeline failed");
    assert_eq!(report.reader.dropped, 2);
    assert_eq!(report.reader.enriched, 2);

    let mut names: Vec<String> = sink.rows().into_iter().map(|row| row.name).collect();
    names.sort();
    assert_eq!(names, vec!["Alice", "Carol"]);
}

#[tokio::test]
async fn final_flush_on_shutdown() {
    let source = MemorySource::default();
    let sink = MemorySink::default();
    // No tick before the shutdown, only the final flush writes
    let (shutdown, handle) = start(&source, &sink, settings(Duration::from_secs(3600)));

    for second in 0..20 {
        source.push_event(&rating("Alice", "Inception", 7, second));
    }
    wait_for(|| source.delivered() == 20).await;
    assert_eq!(sink.write_calls(), 0);

    shutdown.cancel();
    let report = handle.await.unwrap().expect("pipeline failed");

    assert_eq!(sink.write_calls(), 1);
    assert_eq!(sink.rows().len(), 20);
    assert_eq!(source.committed(0), Some(19));
    assert_eq!(report.flush.batches_flushed, 1);
    assert_eq!(report.flush.last_fate, Some(BatchFate::FlushedIntact));
}

#[tokio::test]
async fn stops_and_reports_a_lost_batch() {
    let source = MemorySource::default();
    let sink = MemorySink::default();
    sink.fail_next(SinkError::Unavailable("connection refused".to_string()), 3);
    let (_shutdown, handle) = start(&source, &sink, settings(Duration::from_millis(20)));

    source.push_event(&rating("Alice", "Inception", 8, 1));

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    match result {
        Err(PipelineError::Flush(FlushError::Exhausted {
            rows,
            attempts,
            fate,
            ..
        })) => {
            assert_eq!(rows, 1);
            assert_eq!(attempts, 3);
            assert_eq!(fate, BatchFate::Lost);
        }
        other => panic!("expected an exhausted flush, got {other:?}"),
    }
    assert!(sink.rows().is_empty());
    assert_eq!(source.committed(0), None);
}

#[tokio::test]
async fn dead_letters_and_keeps_running() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemorySource::default();
    let sink = MemorySink::default();
    sink.fail_next(SinkError::Unavailable("connection refused".to_string()), 3);

    let mut settings = settings(Duration::from_millis(20));
    settings.dead_letter_dir = Some(dir.path().to_path_buf());
    let (shutdown, handle) = start(&source, &sink, settings);

    source.push_event(&rating("Alice", "Inception", 8, 1));
    wait_for(|| source.committed(0) == Some(0)).await;

    source.push_event(&rating("Bob", "Inception", 4, 2));
    wait_for(|| sink.rows().len() == 1).await;

    shutdown.cancel();
    let report = handle.await.unwrap().expect("pipeline failed");
    assert_eq!(report.flush.batches_dead_lettered, 1);
    assert_eq!(report.flush.batches_flushed, 1);
    assert_eq!(sink.rows()[0].name, "Bob");

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn flushes_what_was_read_when_the_bus_fails_for_good() {
    let source = MemorySource::default();
    let sink = MemorySink::default();
    // Only the final flush can write the row
    let (_shutdown, handle) = start(&source, &sink, settings(Duration::from_secs(3600)));

    source.push_event(&rating("Alice", "Inception", 8, 1));
    wait_for(|| source.delivered() == 1).await;
    source.fail_next(3);

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    match result {
        Err(PipelineError::Source { last_fate, .. }) => {
            assert_eq!(last_fate, Some(BatchFate::FlushedIntact));
        }
        other => panic!("expected a source failure, got {other:?}"),
    }
    assert_eq!(sink.rows().len(), 1);
    assert_eq!(source.committed(0), Some(0));
}
