//! PostgreSQL backend.
//!
//! The five read statements are prepared lazily, once per store, the first time
//! a caller needs them. A failed prepare leaves the slot empty so the next
//! call tries again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgPool, PgPoolOptions, PgStatement};
use sqlx::{Executor, Statement};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{InsertOutcome, ReferenceStore, STOP_FKEY, TRIP_FKEY, UpdateStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    Direction, NewTripUpdate, Route, Stop, Trip, TripUpdate, TripUpdateRecord,
};

/// Joined select shared by every hydrated read. Optional reference columns
/// are coalesced so rows always scan into plain values.
macro_rules! hydrated_select {
    ($distinct:literal, $tail:literal) => {
        concat!(
            "SELECT ",
            $distinct,
            " trip_updates.id AS id,
              trip_updates.trip_id AS trip_id,
              trip_updates.stop AS stop_id,
              trip_updates.timestamp AS timestamp,
              COALESCE(trip_updates.progress, 0) AS progress,
              COALESCE(trips.direction, '') AS direction,
              COALESCE(trips.route, '') AS trip_route,
              COALESCE(routes.id, '') AS route_id,
              COALESCE(routes.short_name, '') AS short_name,
              COALESCE(routes.name, '') AS route_name,
              COALESCE(routes.description, '') AS description,
              COALESCE(routes.type, 0) AS route_type,
              COALESCE(routes.url, '') AS url,
              COALESCE(routes.color, '') AS color,
              COALESCE(stops.name, '') AS stop_name,
              COALESCE(stops.latitude, 0) AS latitude,
              COALESCE(stops.longitude, 0) AS longitude,
              COALESCE(stops.station, '') AS station
            FROM trip_updates
            LEFT OUTER JOIN trips ON trip_updates.trip_id = trips.id
            LEFT OUTER JOIN routes ON trips.route = routes.id
            LEFT OUTER JOIN stops ON trip_updates.stop = stops.id ",
            $tail
        )
    };
}

const ALL_UPDATES: &str = "SELECT id, trip_id, stop AS stop_id, timestamp FROM trip_updates";

const STATION_UPDATES: &str = hydrated_select!(
    "",
    "WHERE stops.station = $1
     ORDER BY trip_updates.timestamp DESC, trip_updates.id DESC"
);

const LIVE_UPDATES: &str = hydrated_select!(
    "DISTINCT ON (trip_updates.trip_id)",
    "WHERE trip_updates.timestamp > $1
     ORDER BY trip_updates.trip_id, trip_updates.timestamp DESC, trip_updates.id DESC"
);

const TRIP_UPDATES: &str = hydrated_select!(
    "",
    "WHERE trip_updates.trip_id = $1 AND trip_updates.timestamp > $2
     ORDER BY trip_updates.timestamp DESC, trip_updates.id DESC"
);

const ROUTE_UPDATES: &str = hydrated_select!(
    "",
    "WHERE trips.route = $1 AND trip_updates.timestamp > $2
     ORDER BY trip_updates.trip_id, trip_updates.timestamp DESC, trip_updates.id DESC"
);

const INSERT_UPDATE: &str = "INSERT INTO trip_updates (trip_id, stop, timestamp, progress)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (trip_id, stop) DO NOTHING
    RETURNING id";

const INSERT_ROUTE: &str = "INSERT INTO routes (id, short_name, name, description, type, url, color)
    VALUES ($1, NULLIF($2, ''), NULLIF($3, ''), NULLIF($4, ''), $5, NULLIF($6, ''), NULLIF($7, ''))
    ON CONFLICT (id) DO NOTHING";

const INSERT_STOP: &str = "INSERT INTO stops (id, name, latitude, longitude, station)
    VALUES ($1, NULLIF($2, ''), $3, $4, NULLIF($5, ''))
    ON CONFLICT (id) DO NOTHING";

const INSERT_TRIP: &str = "INSERT INTO trips (id, route, direction)
    VALUES ($1, NULLIF($2, ''), $3)
    ON CONFLICT (id) DO NOTHING";

/// A statement prepared on first use and reused afterwards.
struct PreparedQuery {
    sql: &'static str,
    statement: OnceCell<PgStatement<'static>>,
}

impl PreparedQuery {
    fn new(sql: &'static str) -> Self {
        Self {
            sql,
            statement: OnceCell::new(),
        }
    }

    async fn get(&self, pool: &PgPool) -> Result<&PgStatement<'static>> {
        let statement = self
            .statement
            .get_or_try_init(|| async {
                debug!(sql = self.sql, "Preparing statement");
                pool.prepare(self.sql).await
            })
            .await?;
        Ok(statement)
    }
}

struct Statements {
    all: PreparedQuery,
    station: PreparedQuery,
    live: PreparedQuery,
    trip: PreparedQuery,
    route: PreparedQuery,
}

impl Statements {
    fn new() -> Self {
        Self {
            all: PreparedQuery::new(ALL_UPDATES),
            station: PreparedQuery::new(STATION_UPDATES),
            live: PreparedQuery::new(LIVE_UPDATES),
            trip: PreparedQuery::new(TRIP_UPDATES),
            route: PreparedQuery::new(ROUTE_UPDATES),
        }
    }
}

#[derive(sqlx::FromRow)]
struct HydratedRow {
    id: i32,
    trip_id: String,
    stop_id: String,
    timestamp: DateTime<Utc>,
    progress: f64,
    direction: String,
    trip_route: String,
    route_id: String,
    short_name: String,
    route_name: String,
    description: String,
    route_type: i32,
    url: String,
    color: String,
    stop_name: String,
    latitude: f64,
    longitude: f64,
    station: String,
}

impl From<HydratedRow> for TripUpdate {
    fn from(row: HydratedRow) -> Self {
        TripUpdate {
            id: row.id,
            trip: Trip {
                id: row.trip_id,
                route_id: row.trip_route,
                direction: Direction::from(row.direction.as_str()),
            },
            route: Route {
                id: row.route_id,
                short_name: row.short_name,
                name: row.route_name,
                description: row.description,
                route_type: row.route_type,
                url: row.url,
                color: row.color,
            },
            stop: Stop {
                id: row.stop_id,
                name: row.stop_name,
                latitude: row.latitude,
                longitude: row.longitude,
                station: row.station,
            },
            timestamp: row.timestamp,
            progress: row.progress,
        }
    }
}

/// Maps a foreign-key failure on `trip_updates` to the gap it represents.
fn classify(err: sqlx::Error, update: &NewTripUpdate) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(db_err.kind(), ErrorKind::ForeignKeyViolation) {
            return match db_err.constraint() {
                Some(STOP_FKEY) => Error::MissingStop {
                    stop_id: update.stop.id.clone(),
                },
                Some(TRIP_FKEY) => Error::MissingTrip {
                    trip_id: update.trip_id.clone(),
                },
                other => Error::Integrity {
                    constraint: other.unwrap_or("unknown").to_string(),
                },
            };
        }
    }
    Error::Database(err)
}

fn classify_reference(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(db_err.kind(), ErrorKind::ForeignKeyViolation) {
            return Error::Integrity {
                constraint: db_err.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    Error::Database(err)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    statements: Arc<Statements>,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self {
            pool,
            statements: Arc::new(Statements::new()),
            timeout,
        }
    }

    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.statement_timeout)
            .connect(&config.database_url)
            .await?;

        Ok(Self::new(pool, config.statement_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs a store call under the statement timeout.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }

    async fn fetch_hydrated(
        &self,
        query: &PreparedQuery,
        text: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TripUpdate>> {
        self.bounded(async {
            let statement = query.get(&self.pool).await?;
            let mut select = statement.query_as::<HydratedRow>();
            if let Some(text) = text {
                select = select.bind(text);
            }
            if let Some(since) = since {
                select = select.bind(since);
            }
            let rows = select.fetch_all(&self.pool).await?;
            Ok(rows.into_iter().map(TripUpdate::from).collect())
        })
        .await
    }
}

#[async_trait::async_trait]
impl ReferenceStore for PgStore {
    async fn insert_route(&self, route: &Route) -> Result<()> {
        self.bounded(async {
            sqlx::query(INSERT_ROUTE)
                .bind(&route.id)
                .bind(&route.short_name)
                .bind(&route.name)
                .bind(&route.description)
                .bind(route.route_type)
                .bind(&route.url)
                .bind(&route.color)
                .execute(&self.pool)
                .await
                .map_err(classify_reference)?;
            Ok(())
        })
        .await
    }

    async fn insert_stop(&self, stop: &Stop) -> Result<()> {
        self.bounded(async {
            sqlx::query(INSERT_STOP)
                .bind(&stop.id)
                .bind(&stop.name)
                .bind(stop.latitude)
                .bind(stop.longitude)
                .bind(&stop.station)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn insert_trip(&self, trip: &Trip) -> Result<()> {
        self.bounded(async {
            sqlx::query(INSERT_TRIP)
                .bind(&trip.id)
                .bind(&trip.route_id)
                .bind(trip.direction.as_str())
                .execute(&self.pool)
                .await
                .map_err(classify_reference)?;
            Ok(())
        })
        .await
    }
}

#[async_trait::async_trait]
impl UpdateStore for PgStore {
    #[tracing::instrument(skip_all, fields(trip_id = %update.trip_id, stop_id = %update.stop.id))]
    async fn insert_if_absent(&self, update: &NewTripUpdate) -> Result<InsertOutcome> {
        self.bounded(async {
            let id = sqlx::query_scalar::<_, i32>(INSERT_UPDATE)
                .bind(&update.trip_id)
                .bind(&update.stop.id)
                .bind(update.timestamp)
                .bind(update.progress)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify(e, update))?;

            Ok(match id {
                Some(id) => InsertOutcome::Inserted { id },
                None => InsertOutcome::AlreadyRecorded,
            })
        })
        .await
    }

    async fn all_updates(&self) -> Result<Vec<TripUpdateRecord>> {
        self.bounded(async {
            let statement = self.statements.all.get(&self.pool).await?;
            let records = statement
                .query_as::<TripUpdateRecord>()
                .fetch_all(&self.pool)
                .await?;
            Ok(records)
        })
        .await
    }

    async fn updates_for_station(&self, station: &str) -> Result<Vec<TripUpdate>> {
        self.fetch_hydrated(&self.statements.station, Some(station), None)
            .await
    }

    async fn live_updates(&self, since: DateTime<Utc>) -> Result<Vec<TripUpdate>> {
        self.fetch_hydrated(&self.statements.live, None, Some(since))
            .await
    }

    async fn updates_for_trip(
        &self,
        trip_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TripUpdate>> {
        self.fetch_hydrated(&self.statements.trip, Some(trip_id), Some(since))
            .await
    }

    async fn updates_for_route(
        &self,
        route_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TripUpdate>> {
        self.fetch_hydrated(&self.statements.route, Some(route_id), Some(since))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    #[test]
    fn test_live_query_keeps_one_row_per_trip() {
        assert!(LIVE_UPDATES.starts_with("SELECT DISTINCT ON (trip_updates.trip_id)"));
        assert!(LIVE_UPDATES.contains("ORDER BY trip_updates.trip_id, trip_updates.timestamp DESC"));
    }

    #[test]
    fn test_hydrated_queries_coalesce_route_columns() {
        for sql in [STATION_UPDATES, LIVE_UPDATES, TRIP_UPDATES, ROUTE_UPDATES] {
            assert!(sql.contains("COALESCE(routes.short_name, '') AS short_name"));
            assert!(sql.contains("COALESCE(routes.color, '') AS color"));
            assert!(sql.contains("COALESCE(routes.type, 0) AS route_type"));
        }
    }

    #[test]
    fn test_insert_is_conditional_on_trip_and_stop() {
        assert!(INSERT_UPDATE.contains("ON CONFLICT (trip_id, stop) DO NOTHING"));
    }

    /// A lazy pool pointed at `addr`; nothing connects until the first query.
    fn lazy_store(addr: SocketAddr, timeout: Duration) -> PgStore {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(1))
            .connect_lazy(&format!("postgres://trip_tracker@{addr}/trip_tracker"))
            .unwrap();
        PgStore::new(pool, timeout)
    }

    #[tokio::test]
    async fn test_failed_prepare_is_retried_on_next_call() {
        // Bind then release a port so connections to it are refused.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let store = lazy_store(addr, Duration::from_secs(10));

        for _ in 0..2 {
            let err = store.live_updates(Utc::now()).await.unwrap_err();
            assert!(matches!(err, Error::Database(_)), "unexpected error: {err}");
            assert!(store.statements.live.statement.get().is_none());
        }

        let err = store.all_updates().await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(store.statements.all.statement.get().is_none());
    }

    #[tokio::test]
    async fn test_store_call_times_out() {
        // Accepts the connection but never answers the startup handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let timeout = Duration::from_millis(50);
        let store = lazy_store(listener.local_addr().unwrap(), timeout);

        let err = store.live_updates(Utc::now()).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(t) if t == timeout));
        drop(listener);
    }
}
