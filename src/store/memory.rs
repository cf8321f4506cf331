//! In-process backend with the same constraints and orderings as
//! [`PgStore`](super::PgStore). Every mutation runs under one write lock.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{InsertOutcome, ROUTE_FKEY, ReferenceStore, UpdateStore};
use crate::error::{Error, Result};
use crate::model::{NewTripUpdate, Route, Stop, Trip, TripUpdate, TripUpdateRecord};

#[derive(Debug, Clone)]
struct StoredUpdate {
    id: i32,
    trip_id: String,
    stop_id: String,
    timestamp: DateTime<Utc>,
    progress: f64,
}

#[derive(Debug, Default)]
struct Tables {
    routes: HashMap<String, Route>,
    stops: HashMap<String, Stop>,
    trips: HashMap<String, Trip>,
    updates: Vec<StoredUpdate>,
    recorded: HashSet<(String, String)>,
    next_id: i32,
}

impl Tables {
    fn hydrate(&self, row: &StoredUpdate) -> TripUpdate {
        let trip = self.trips.get(&row.trip_id).cloned().unwrap_or_else(|| Trip {
            id: row.trip_id.clone(),
            ..Default::default()
        });
        let route = self.routes.get(&trip.route_id).cloned().unwrap_or_default();
        let stop = self
            .stops
            .get(&row.stop_id)
            .cloned()
            .unwrap_or_else(|| Stop::with_id(row.stop_id.clone()));

        TripUpdate {
            id: row.id,
            trip,
            route,
            stop,
            timestamp: row.timestamp,
            progress: row.progress,
        }
    }

    fn hydrate_where(&self, keep: impl Fn(&StoredUpdate) -> bool) -> Vec<TripUpdate> {
        self.updates
            .iter()
            .filter(|row| keep(row))
            .map(|row| self.hydrate(row))
            .collect()
    }
}

fn newest_first(a: &TripUpdate, b: &TripUpdate) -> std::cmp::Ordering {
    (Reverse(a.timestamp), Reverse(a.id)).cmp(&(Reverse(b.timestamp), Reverse(b.id)))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stop_count(&self) -> usize {
        self.tables.read().await.stops.len()
    }

    pub async fn stop(&self, id: &str) -> Option<Stop> {
        self.tables.read().await.stops.get(id).cloned()
    }
}

#[async_trait::async_trait]
impl ReferenceStore for MemoryStore {
    async fn insert_route(&self, route: &Route) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .routes
            .entry(route.id.clone())
            .or_insert_with(|| route.clone());
        Ok(())
    }

    async fn insert_stop(&self, stop: &Stop) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .stops
            .entry(stop.id.clone())
            .or_insert_with(|| stop.clone());
        Ok(())
    }

    async fn insert_trip(&self, trip: &Trip) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.trips.contains_key(&trip.id) {
            return Ok(());
        }
        if !trip.route_id.is_empty() && !tables.routes.contains_key(&trip.route_id) {
            return Err(Error::Integrity {
                constraint: ROUTE_FKEY.to_string(),
            });
        }
        tables.trips.insert(trip.id.clone(), trip.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl UpdateStore for MemoryStore {
    async fn insert_if_absent(&self, update: &NewTripUpdate) -> Result<InsertOutcome> {
        let mut tables = self.tables.write().await;

        let key = (update.trip_id.clone(), update.stop.id.clone());
        if tables.recorded.contains(&key) {
            return Ok(InsertOutcome::AlreadyRecorded);
        }
        if !tables.trips.contains_key(&update.trip_id) {
            return Err(Error::MissingTrip {
                trip_id: update.trip_id.clone(),
            });
        }
        if !tables.stops.contains_key(&update.stop.id) {
            return Err(Error::MissingStop {
                stop_id: update.stop.id.clone(),
            });
        }

        tables.next_id += 1;
        let id = tables.next_id;
        tables.updates.push(StoredUpdate {
            id,
            trip_id: update.trip_id.clone(),
            stop_id: update.stop.id.clone(),
            timestamp: update.timestamp,
            progress: update.progress,
        });
        tables.recorded.insert(key);

        Ok(InsertOutcome::Inserted { id })
    }

    async fn all_updates(&self) -> Result<Vec<TripUpdateRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .updates
            .iter()
            .map(|row| TripUpdateRecord {
                id: row.id,
                trip_id: row.trip_id.clone(),
                stop_id: row.stop_id.clone(),
                timestamp: row.timestamp,
            })
            .collect())
    }

    async fn updates_for_station(&self, station: &str) -> Result<Vec<TripUpdate>> {
        let tables = self.tables.read().await;
        let mut updates = tables.hydrate_where(|row| {
            tables
                .stops
                .get(&row.stop_id)
                .is_some_and(|stop| stop.station == station)
        });
        updates.sort_by(newest_first);
        Ok(updates)
    }

    async fn live_updates(&self, since: DateTime<Utc>) -> Result<Vec<TripUpdate>> {
        let tables = self.tables.read().await;
        let mut latest: HashMap<String, TripUpdate> = HashMap::new();
        for update in tables.hydrate_where(|row| row.timestamp > since) {
            let newer = latest
                .get(&update.trip.id)
                .is_none_or(|current| newest_first(&update, current).is_lt());
            if newer {
                latest.insert(update.trip.id.clone(), update);
            }
        }

        let mut updates: Vec<TripUpdate> = latest.into_values().collect();
        updates.sort_by(|a, b| a.trip.id.cmp(&b.trip.id));
        Ok(updates)
    }

    async fn updates_for_trip(
        &self,
        trip_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TripUpdate>> {
        let tables = self.tables.read().await;
        let mut updates =
            tables.hydrate_where(|row| row.trip_id == trip_id && row.timestamp > since);
        updates.sort_by(newest_first);
        Ok(updates)
    }

    async fn updates_for_route(
        &self,
        route_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TripUpdate>> {
        let tables = self.tables.read().await;
        let mut updates = tables.hydrate_where(|row| {
            row.timestamp > since
                && tables
                    .trips
                    .get(&row.trip_id)
                    .is_some_and(|trip| !trip.route_id.is_empty() && trip.route_id == route_id)
        });
        updates.sort_by(|a, b| a.trip.id.cmp(&b.trip.id).then_with(|| newest_first(a, b)));
        Ok(updates)
    }
}
