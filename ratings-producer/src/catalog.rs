use std::fs::File;
use std::io::Read;
use std::path::Path;

use fake::faker::name::en::Name;
use fake::Fake;
use thiserror::Error;
use tracing::info;

/// Always part of the default name pool.
pub const FIXED_NAME: &str = "Stelios Giagkos";

/// How many random names the default pool gets next to `FIXED_NAME`.
const GENERATED_NAMES: usize = 14;

/// Name pool used when `PRODUCER_NAMES` is not set: random full names drawn
/// once at startup, plus the fixed one.
pub fn default_names() -> Vec<String> {
    let mut names: Vec<String> = (0..GENERATED_NAMES).map(|_| Name().fake()).collect();
    names.push(FIXED_NAME.to_owned());
    names
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to open movie catalog {path}: {error}")]
    Open { path: String, error: std::io::Error },
    #[error("failed to read movie catalog: {0}")]
    Csv(#[from] csv::Error),
    #[error("the name pool is empty")]
    NoNames,
    #[error("the movie catalog is empty")]
    NoMovies,
}

/// The fixed pools events are sampled from. Both are non-empty.
#[derive(Debug, Clone)]
pub struct Catalog {
    names: Vec<String>,
    movies: Vec<String>,
}

impl Catalog {
    pub fn new(names: Vec<String>, movies: Vec<String>) -> Result<Catalog, CatalogError> {
        if names.is_empty() {
            return Err(CatalogError::NoNames);
        }
        if movies.is_empty() {
            return Err(CatalogError::NoMovies);
        }

        Ok(Catalog { names, movies })
    }

    /// Loads the movie titles from `movies_path`. `names` overrides the
    /// default name pool when given.
    pub fn load(movies_path: &Path, names: Option<&str>) -> Result<Catalog, CatalogError> {
        let file = File::open(movies_path).map_err(|error| CatalogError::Open {
            path: movies_path.display().to_string(),
            error,
        })?;
        let movies = read_movie_titles(file)?;

        let names = match names {
            Some(raw) => parse_names(raw),
            None => default_names(),
        };

        info!(
            "loaded catalog with {} movies and {} names",
            movies.len(),
            names.len()
        );
        Catalog::new(names, movies)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn movies(&self) -> &[String] {
        &self.movies
    }
}

/// Reads the first column of a header-less CSV. Blank titles are skipped.
pub fn read_movie_titles<R: Read>(reader: R) -> Result<Vec<String>, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut movies = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(title) = record.get(0).map(str::trim).filter(|t| !t.is_empty()) {
            movies.push(title.to_owned());
        }
    }
    Ok(movies)
}

pub fn parse_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
