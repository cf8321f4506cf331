//! Persistence for reference tables and trip updates.
//!
//! [`ReferenceStore`] owns routes, stops and trips. [`UpdateStore`] adds the
//! trip update table and its joined reads. [`postgres::PgStore`] is the
//! production backend; [`memory::MemoryStore`] keeps everything in process.

pub mod memory;
pub mod postgres;
pub mod schema;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::model::{NewTripUpdate, ReferenceData, Route, Stop, Trip, TripUpdate, TripUpdateRecord};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Constraint fired when an update names an unknown stop.
pub const STOP_FKEY: &str = "trip_updates_stop_fkey";
/// Constraint fired when an update names an unknown trip.
pub const TRIP_FKEY: &str = "trip_updates_trip_id_fkey";
/// Constraint fired when a trip names an unknown route.
pub const ROUTE_FKEY: &str = "trips_route_fkey";

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { id: i32 },
    /// A row for the same (trip, stop) pair already exists; nothing changed.
    AlreadyRecorded,
}

/// Routes, stops and trips keyed by feed id.
///
/// Every insert is "insert if absent": an existing row is left untouched and
/// the call still succeeds.
#[async_trait::async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn insert_route(&self, route: &Route) -> Result<()>;

    async fn insert_stop(&self, stop: &Stop) -> Result<()>;

    async fn insert_trip(&self, trip: &Trip) -> Result<()>;

    /// Loads a whole reference document: routes, then stops, then trips.
    async fn load_reference(&self, data: &ReferenceData) -> Result<()> {
        for route in &data.routes {
            self.insert_route(route).await?;
        }
        for stop in &data.stops {
            self.insert_stop(stop).await?;
        }
        for trip in &data.trips {
            self.insert_trip(trip).await?;
        }

        info!(
            routes = data.routes.len(),
            stops = data.stops.len(),
            trips = data.trips.len(),
            "Reference data loaded"
        );
        Ok(())
    }
}

/// The trip update table and its reads.
///
/// Implementations report foreign-key failures as
/// [`Error::MissingStop`](crate::error::Error::MissingStop),
/// [`Error::MissingTrip`](crate::error::Error::MissingTrip) or
/// [`Error::Integrity`](crate::error::Error::Integrity) depending on the
/// constraint that fired. Windowed reads keep rows with `timestamp > since`.
#[async_trait::async_trait]
pub trait UpdateStore: ReferenceStore {
    /// Records the update unless one already exists for its (trip, stop) pair.
    async fn insert_if_absent(&self, update: &NewTripUpdate) -> Result<InsertOutcome>;

    /// Full history, identifiers only, in no particular order.
    async fn all_updates(&self) -> Result<Vec<TripUpdateRecord>>;

    /// Updates at any platform of `station`, newest first.
    async fn updates_for_station(&self, station: &str) -> Result<Vec<TripUpdate>>;

    /// Newest update per trip since `since`, ordered by trip id.
    async fn live_updates(&self, since: DateTime<Utc>) -> Result<Vec<TripUpdate>>;

    /// Updates of one trip since `since`, newest first.
    async fn updates_for_trip(&self, trip_id: &str, since: DateTime<Utc>)
    -> Result<Vec<TripUpdate>>;

    /// Updates of every trip on `route_id` since `since`, by trip id then newest first.
    async fn updates_for_route(
        &self,
        route_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TripUpdate>>;
}
