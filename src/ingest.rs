//! Trip update ingestion.
//!
//! Each update is recorded at most once per (trip, stop) pair. When the live
//! feed names a stop the static snapshot does not know yet, the stop is
//! inserted and the update retried, a bounded number of times.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::NewTripUpdate;
use crate::store::{InsertOutcome, UpdateStore};

/// Stop heals allowed per update before giving up.
pub const DEFAULT_HEAL_ATTEMPTS: u32 = 1;

pub struct Ingestor<S> {
    store: Arc<S>,
    heal_attempts: u32,
}

impl<S: UpdateStore> Ingestor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            heal_attempts: DEFAULT_HEAL_ATTEMPTS,
        }
    }

    pub fn with_heal_attempts(mut self, heal_attempts: u32) -> Self {
        self.heal_attempts = heal_attempts;
        self
    }

    /// Records `update` unless its (trip, stop) pair is already stored.
    ///
    /// # Errors
    ///
    /// - [`Error::HealExhausted`] if the stop is still missing after every heal.
    /// - [`Error::Heal`] if inserting the missing stop failed.
    /// - [`Error::MissingTrip`] and store failures are returned unchanged.
    #[tracing::instrument(skip_all, fields(trip_id = %update.trip_id, stop_id = %update.stop.id))]
    pub async fn insert(&self, update: &NewTripUpdate) -> Result<InsertOutcome> {
        let mut healed = 0;

        loop {
            match self.store.insert_if_absent(update).await {
                Err(Error::MissingStop { stop_id }) => {
                    if healed >= self.heal_attempts {
                        return Err(Error::HealExhausted {
                            trip_id: update.trip_id.clone(),
                            stop_id,
                            attempts: healed,
                        });
                    }

                    warn!(stop_id = %stop_id, "Inserting unexpected new stop");
                    self.store
                        .insert_stop(&update.stop)
                        .await
                        .map_err(|source| Error::Heal {
                            stop_id,
                            source: Box::new(source),
                        })?;
                    healed += 1;
                }
                Ok(outcome) => {
                    debug!(?outcome, healed, "Trip update ingested");
                    return Ok(outcome);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Ingests `updates` in order. Every item gets its own result.
    pub async fn insert_all(&self, updates: &[NewTripUpdate]) -> Vec<Result<InsertOutcome>> {
        let mut results = Vec::with_capacity(updates.len());
        for update in updates {
            results.push(self.insert(update).await);
        }
        results
    }
}
