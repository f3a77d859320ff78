use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ratings_common::types::{RatingEvent, MAX_RATING, MIN_RATING};

use crate::catalog::Catalog;

/// Samples a name, a movie, and a uniform rating for every event.
pub struct RatingGenerator {
    catalog: Catalog,
    rng: StdRng,
}

impl RatingGenerator {
    pub fn new(catalog: Catalog, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { catalog, rng }
    }

    pub fn next_event(&mut self, now: DateTime<Utc>) -> RatingEvent {
        // Catalog pools are never empty
        let names = self.catalog.names();
        let movies = self.catalog.movies();
        let name = names[self.rng.gen_range(0..names.len())].clone();
        let movie = movies[self.rng.gen_range(0..movies.len())].clone();

        RatingEvent {
            name,
            movie,
            rating: self.rng.gen_range(MIN_RATING..=MAX_RATING),
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn catalog() -> Catalog {
        Catalog::new(
            vec!["Alice".to_string(), "Bob".to_string()],
            vec![
                "Inception".to_string(),
                "Up".to_string(),
                "Heat".to_string(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn samples_from_the_catalog() {
        let mut generator = RatingGenerator::new(catalog(), None);
        let now = Utc::now();
        let mut ratings = HashSet::new();

        for _ in 0..1000 {
            let event = generator.next_event(now);
            assert!(["Alice", "Bob"].contains(&event.name.as_str()));
            assert!(["Inception", "Up", "Heat"].contains(&event.movie.as_str()));
            assert!((1..=10).contains(&event.rating));
            assert_eq!(event.timestamp, now);
            ratings.insert(event.rating);
        }

        // Every rating shows up across a thousand uniform draws
        assert_eq!(ratings.len(), 10);
    }

    #[test]
    fn seeded_generators_are_reproducible() {
        let now = Utc::now();
        let mut first = RatingGenerator::new(catalog(), Some(42));
        let mut second = RatingGenerator::new(catalog(), Some(42));

        for _ in 0..50 {
            assert_eq!(first.next_event(now), second.next_event(now));
        }
    }
}
