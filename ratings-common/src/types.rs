use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 10;

/// A single user rating as published on the ratings topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub name: String,
    pub movie: String,
    pub rating: i32,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record has no payload")]
    Empty,
    #[error("payload does not match the rating schema: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("rating {0} is outside of [1, 10]")]
    RatingOutOfRange(i32),
}

impl DecodeError {
    /// Short label for the drop-reason metric.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::Empty => "empty",
            DecodeError::Malformed(_) => "malformed",
            DecodeError::RatingOutOfRange(_) => "rating_out_of_range",
        }
    }
}

impl RatingEvent {
    /// Decode a bus payload: UTF-8 JSON with `name`, `movie`, `rating` and
    /// `timestamp`, all required. Unknown fields are ignored.
    pub fn decode(payload: &[u8]) -> Result<RatingEvent, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        let event: RatingEvent = serde_json::from_slice(payload)?;
        if !(MIN_RATING..=MAX_RATING).contains(&event.rating) {
            return Err(DecodeError::RatingOutOfRange(event.rating));
        }

        Ok(event)
    }

    /// Encode for publishing, timestamps are written as RFC 3339 in UTC.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Accepts RFC 3339 timestamps, as well as naive ISO-8601 date-times which
/// are taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| de::Error::custom(format!("invalid ISO-8601 timestamp: {raw}")))
}

/// One row of the reference (catalog) dataset, keyed by `title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub title: String,
    pub show_id: String,
    pub duration: Option<String>,
    /// Content classification, e.g. "PG-13". Not the user rating.
    pub rating: Option<String>,
    pub release_year: Option<i32>,
    pub director: Option<String>,
    pub country: Option<String>,
}

/// The output of a successful join, one row of the sink table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: Uuid,
    pub show_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub movie: String,
    /// The user rating, renamed from `RatingEvent::rating`.
    pub rating_movie: i32,
    pub duration: Option<String>,
    /// The content classification from the reference row.
    pub rating: Option<String>,
    pub release_year: Option<i32>,
    pub director: Option<String>,
    pub country: Option<String>,
}

impl EnrichedRecord {
    pub fn join(id: Uuid, event: &RatingEvent, reference: &ReferenceRecord) -> EnrichedRecord {
        EnrichedRecord {
            id,
            show_id: reference.show_id.clone(),
            name: event.name.clone(),
            timestamp: event.timestamp,
            movie: event.movie.clone(),
            rating_movie: event.rating,
            duration: reference.duration.clone(),
            rating: reference.rating.clone(),
            release_year: reference.release_year,
            director: reference.director.clone(),
            country: reference.country.clone(),
        }
    }

    pub fn with_id(self, id: Uuid) -> EnrichedRecord {
        EnrichedRecord { id, ..self }
    }
}
