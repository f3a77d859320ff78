pub const REFERENCE_ROWS_LOADED: &str = "ratings_enricher_reference_rows_loaded";
pub const REFERENCE_ROWS_SKIPPED: &str = "ratings_enricher_reference_rows_skipped";

pub const RECORDS_RECEIVED: &str = "ratings_enricher_records_received";
pub const SCHEMA_DROPS: &str = "ratings_enricher_schema_drops";
pub const RECV_ERRORS: &str = "ratings_enricher_recv_errors";
pub const JOIN_MATCHES: &str = "ratings_enricher_join_matches";
pub const JOIN_MISSES: &str = "ratings_enricher_join_misses";
pub const RECORDS_ENRICHED: &str = "ratings_enricher_records_enriched";

pub const TRIGGER_STATE: &str = "ratings_enricher_trigger_state";
pub const BATCH_SIZE: &str = "ratings_enricher_batch_size";
pub const FLUSH_TIME: &str = "ratings_enricher_flush_time_ms";
pub const BATCHES_FLUSHED: &str = "ratings_enricher_batches_flushed";
pub const BATCHES_SKIPPED: &str = "ratings_enricher_batches_skipped";
pub const BATCHES_DEAD_LETTERED: &str = "ratings_enricher_batches_dead_lettered";
pub const BATCHES_LOST: &str = "ratings_enricher_batches_lost";
pub const ROWS_WRITTEN: &str = "ratings_enricher_rows_written";
pub const WRITE_ATTEMPTS: &str = "ratings_enricher_write_attempts";
pub const WRITE_RETRIES: &str = "ratings_enricher_write_retries";
pub const ID_REGENERATIONS: &str = "ratings_enricher_id_regenerations";
pub const COMMIT_FAILURES: &str = "ratings_enricher_commit_failures";
