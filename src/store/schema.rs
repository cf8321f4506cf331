use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

/// Tables in foreign-key order. Constraint names are matched by
/// [`PgStore`](super::PgStore) when classifying insert failures.
pub const SCHEMA: &str = r#"

CREATE TABLE IF NOT EXISTS routes (
    id VARCHAR(100) PRIMARY KEY,
    short_name TEXT,
    name TEXT,
    description TEXT,
    type INTEGER,
    url TEXT,
    color TEXT
);

CREATE TABLE IF NOT EXISTS stops (
    id VARCHAR(100) PRIMARY KEY,
    name TEXT,
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    station TEXT
);

CREATE TABLE IF NOT EXISTS trips (
    id VARCHAR(100) PRIMARY KEY,
    route VARCHAR(100),
    direction TEXT,
    CONSTRAINT trips_route_fkey FOREIGN KEY (route) REFERENCES routes (id)
);

CREATE TABLE IF NOT EXISTS trip_updates (
    id SERIAL PRIMARY KEY,
    trip_id VARCHAR(100),
    stop VARCHAR(100),
    timestamp TIMESTAMPTZ NOT NULL,
    progress DOUBLE PRECISION,
    CONSTRAINT trip_updates_trip_id_fkey FOREIGN KEY (trip_id) REFERENCES trips (id),
    CONSTRAINT trip_updates_stop_fkey FOREIGN KEY (stop) REFERENCES stops (id),
    CONSTRAINT trip_updates_trip_stop_key UNIQUE (trip_id, stop)
);

CREATE INDEX IF NOT EXISTS trip_updates_timestamp_idx ON trip_updates (timestamp);
CREATE INDEX IF NOT EXISTS stops_station_idx ON stops (station);

"#;

const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS trip_updates CASCADE;
DROP TABLE IF EXISTS trips CASCADE;
DROP TABLE IF EXISTS stops CASCADE;
DROP TABLE IF EXISTS routes CASCADE;
"#;

pub async fn create_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    info!("Schema ready");
    Ok(())
}

pub async fn drop_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(DROP_SCHEMA).execute(pool).await?;
    info!("Schema dropped");
    Ok(())
}
