use async_trait::async_trait;
use ratings_common::types::EnrichedRecord;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::errors::{DbError, ExecutionError, RequestAttemptError};
use scylla::statement::batch::{Batch, BatchType};
use scylla::statement::prepared::PreparedStatement;
use tracing::{info, instrument};

use super::RatingSink;
use crate::config::ScyllaConfig;
use crate::error::SinkError;

/// Writes batches into a Cassandra/Scylla table, one LOGGED batch per call.
///
/// The table is keyed on `id` alone, so a replayed batch overwrites its own
/// rows instead of adding new ones, and other rows are never touched.
pub struct ScyllaSink {
    session: Session,
    insert: PreparedStatement,
}

impl ScyllaSink {
    /// Connects, creates the keyspace and table if missing, and prepares the
    /// insert statement.
    pub async fn connect(config: &ScyllaConfig) -> Result<Self, SinkError> {
        let keyspace = identifier(&config.scylla_keyspace)?;
        let table = identifier(&config.scylla_table)?;

        let session = SessionBuilder::new()
            .known_node(&config.scylla_host)
            .connection_timeout(config.scylla_connection_timeout_ms.0)
            .build()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let create_keyspace = format!(
            "CREATE KEYSPACE IF NOT EXISTS {keyspace} \
             WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
            config.scylla_replication_factor
        );
        session
            .query_unpaged(create_keyspace, &[])
            .await
            .map_err(classify)?;

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.{table} ( \
             id uuid PRIMARY KEY, \
             show_id text, \
             name text, \
             timestamp timestamp, \
             movie text, \
             rating_movie int, \
             duration text, \
             rating text, \
             release_year int, \
             director text, \
             country text)"
        );
        session
            .query_unpaged(create_table, &[])
            .await
            .map_err(classify)?;

        let insert = session
            .prepare(format!(
                "INSERT INTO {keyspace}.{table} \
                 (id, show_id, name, timestamp, movie, rating_movie, duration, rating, release_year, director, country) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        info!(
            host = %config.scylla_host,
            "writing ratings to {}.{}", keyspace, table
        );
        Ok(Self { session, insert })
    }
}

#[async_trait]
impl RatingSink for ScyllaSink {
    #[instrument(skip_all, fields(rows = records.len()))]
    async fn append_batch(&self, records: &[EnrichedRecord]) -> Result<(), SinkError> {
        let mut batch = Batch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(records.len());
        for record in records {
            batch.append_statement(self.insert.clone());
            values.push((
                record.id,
                record.show_id.as_str(),
                record.name.as_str(),
                record.timestamp,
                record.movie.as_str(),
                record.rating_movie,
                record.duration.as_deref(),
                record.rating.as_deref(),
                record.release_year,
                record.director.as_deref(),
                record.country.as_deref(),
            ));
        }

        self.session
            .batch(&batch, values)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// A write timeout means the coordinator gave up waiting for replicas, the
/// logged batch may still be applied later.
fn classify(error: ExecutionError) -> SinkError {
    match &error {
        ExecutionError::RequestTimeout(_)
        | ExecutionError::LastAttemptError(RequestAttemptError::DbError(
            DbError::WriteTimeout { .. },
            _,
        )) => SinkError::Indeterminate(error.to_string()),
        _ => SinkError::Unavailable(error.to_string()),
    }
}

/// Keyspace and table names end up in the statements verbatim.
fn identifier(name: &str) -> Result<&str, SinkError> {
    let valid = !name.is_empty()
        && name.len() <= 48
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    match valid {
        true => Ok(name),
        false => Err(SinkError::Config(format!(
            "{name:?} is not a valid keyspace or table name"
        ))),
    }
}
