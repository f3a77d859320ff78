use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use ratings_common::types::{EnrichedRecord, RatingEvent};
use uuid::Uuid;

use crate::reference::ReferenceTable;

/// Hands out random (v4) row ids. Clones share their random state, so a
/// seeded generator yields one reproducible sequence however it is shared.
#[derive(Clone, Default)]
pub struct IdGenerator {
    seeded: Option<Arc<Mutex<StdRng>>>,
}

impl IdGenerator {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seeded: Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed)))),
        }
    }

    pub fn next_id(&self) -> Uuid {
        let Some(rng) = &self.seeded else {
            return Uuid::new_v4();
        };

        let mut bytes = [0u8; 16];
        rng.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

/// Inner join of rating events against the reference table.
#[derive(Clone)]
pub struct Enricher {
    reference: Arc<ReferenceTable>,
    ids: IdGenerator,
}

impl Enricher {
    pub fn new(reference: Arc<ReferenceTable>, ids: IdGenerator) -> Self {
        Self { reference, ids }
    }

    /// One record per reference row titled `event.movie`, each with a fresh
    /// id. Empty when nothing matches.
    pub fn enrich(&self, event: &RatingEvent) -> Vec<EnrichedRecord> {
        self.reference
            .lookup(&event.movie)
            .iter()
            .map(|reference| EnrichedRecord::join(self.ids.next_id(), event, reference))
            .collect()
    }
}
