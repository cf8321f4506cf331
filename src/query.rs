//! Time-windowed reads over stored trip updates.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::error::Result;
use crate::model::{TripUpdate, TripUpdateRecord};
use crate::store::UpdateStore;

/// A train silent for this long is treated as out of service.
pub const LIVE_WINDOW_MINUTES: i64 = 20;
/// Per-trip and per-route history covers "today".
pub const HISTORY_WINDOW_HOURS: i64 = 24;

pub fn live_window() -> TimeDelta {
    TimeDelta::minutes(LIVE_WINDOW_MINUTES)
}

pub fn history_window() -> TimeDelta {
    TimeDelta::hours(HISTORY_WINDOW_HOURS)
}

pub struct QueryEngine<S> {
    store: Arc<S>,
}

impl<S: UpdateStore> QueryEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Full history, identifiers only.
    pub async fn all(&self) -> Result<Vec<TripUpdateRecord>> {
        self.store.all_updates().await
    }

    /// Every update at any platform of `station`, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn by_station(&self, station: &str) -> Result<Vec<TripUpdate>> {
        let updates = self.store.updates_for_station(station).await?;
        debug!(rows = updates.len(), "Station updates read");
        Ok(updates)
    }

    /// Current position of every trip heard from in the last
    /// [`LIVE_WINDOW_MINUTES`], one row per trip.
    pub async fn live(&self) -> Result<Vec<TripUpdate>> {
        self.live_at(Utc::now()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn live_at(&self, now: DateTime<Utc>) -> Result<Vec<TripUpdate>> {
        let updates = self.store.live_updates(now - live_window()).await?;
        debug!(trips = updates.len(), "Live snapshot read");
        Ok(updates)
    }

    /// History of one trip over the last [`HISTORY_WINDOW_HOURS`], newest first.
    pub async fn by_trip(&self, trip_id: &str) -> Result<Vec<TripUpdate>> {
        self.by_trip_at(trip_id, Utc::now()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn by_trip_at(&self, trip_id: &str, now: DateTime<Utc>) -> Result<Vec<TripUpdate>> {
        self.store
            .updates_for_trip(trip_id, now - history_window())
            .await
    }

    /// History of every trip on a route over the last
    /// [`HISTORY_WINDOW_HOURS`], grouped by trip.
    pub async fn by_route(&self, route_id: &str) -> Result<Vec<TripUpdate>> {
        self.by_route_at(route_id, Utc::now()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn by_route_at(
        &self,
        route_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TripUpdate>> {
        self.store
            .updates_for_route(route_id, now - history_window())
            .await
    }
}
