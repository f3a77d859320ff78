use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use ratings_common::types::ReferenceRecord;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ReferenceError;
use crate::metrics_consts::{REFERENCE_ROWS_LOADED, REFERENCE_ROWS_SKIPPED};

/// One CSV row as read. Columns we do not join on are ignored.
#[derive(Debug, Deserialize)]
struct ReferenceRow {
    title: Option<String>,
    show_id: Option<String>,
    duration: Option<String>,
    rating: Option<String>,
    release_year: Option<String>,
    director: Option<String>,
    country: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ReferenceRow {
    fn into_record(self) -> Option<ReferenceRecord> {
        let title = non_empty(self.title)?;
        let show_id = non_empty(self.show_id)?;

        Some(ReferenceRecord {
            title,
            show_id,
            duration: non_empty(self.duration),
            rating: non_empty(self.rating),
            release_year: self
                .release_year
                .and_then(|year| year.trim().parse::<i32>().ok()),
            director: non_empty(self.director),
            country: non_empty(self.country),
        })
    }
}

/// The reference dataset, indexed by title. Immutable once built: share it
/// behind an `Arc` and read it from as many tasks as needed.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    by_title: HashMap<String, Vec<ReferenceRecord>>,
    rows: usize,
    skipped: usize,
}

impl ReferenceTable {
    pub fn load(path: &Path) -> Result<ReferenceTable, ReferenceError> {
        let file = File::open(path).map_err(|error| ReferenceError::Open {
            path: path.display().to_string(),
            error,
        })?;
        let table = ReferenceTable::from_reader(file)?;

        info!(
            rows = table.rows,
            titles = table.by_title.len(),
            skipped = table.skipped,
            "loaded reference dataset from {}",
            path.display()
        );
        metrics::gauge!(REFERENCE_ROWS_LOADED).set(table.rows as f64);
        metrics::gauge!(REFERENCE_ROWS_SKIPPED).set(table.skipped as f64);

        Ok(table)
    }

    /// Reads a CSV with a header row. Rows without a `title` or a `show_id`
    /// cannot be joined and are skipped, so are rows that fail to parse.
    pub fn from_reader<R: Read>(reader: R) -> Result<ReferenceTable, ReferenceError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let mut records = Vec::new();
        let mut skipped = 0;
        for (line, row) in reader.deserialize::<ReferenceRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!("skipping unreadable reference row {}: {}", line + 1, e);
                    skipped += 1;
                    continue;
                }
            };

            match row.into_record() {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }

        let mut table = ReferenceTable::from_records(records);
        table.skipped = skipped;
        Ok(table)
    }

    pub fn from_records(records: impl IntoIterator<Item = ReferenceRecord>) -> ReferenceTable {
        let mut table = ReferenceTable::default();
        for record in records {
            table.rows += 1;
            table
                .by_title
                .entry(record.title.clone())
                .or_default()
                .push(record);
        }
        table
    }

    /// Every row whose title is exactly `title`, in load order.
    pub fn lookup(&self, title: &str) -> &[ReferenceRecord] {
        self.by_title.get(title).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
