//! Reference entities and trip update views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Nullable reference columns read back as their empty value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub short_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub route_type: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub color: String,
}

/// A platform. Several stops share one `station`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub latitude: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub longitude: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub station: String,
}

impl Stop {
    /// A stop known only by its id, as seen in a live update.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Uptown,
    Downtown,
    #[default]
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Uptown => "uptown",
            Direction::Downtown => "downtown",
            Direction::Unknown => "unknown",
        }
    }
}

impl From<&str> for Direction {
    /// Accepts the stored names as well as the feed's `N`/`S` suffixes.
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "uptown" | "n" | "north" => Direction::Uptown,
            "downtown" | "s" | "south" => Direction::Downtown,
            _ => Direction::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    /// Owning route id; empty when the trip was loaded without one.
    #[serde(rename = "route", default, deserialize_with = "null_as_default")]
    pub route_id: String,
    #[serde(default)]
    pub direction: Direction,
}

/// A position report waiting to be ingested. `stop` carries whatever
/// attributes the feed attached; usually just the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTripUpdate {
    pub trip_id: String,
    pub stop: Stop,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub progress: f64,
}

impl NewTripUpdate {
    pub fn new(
        trip_id: impl Into<String>,
        stop_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        progress: f64,
    ) -> Self {
        Self {
            trip_id: trip_id.into(),
            stop: Stop::with_id(stop_id),
            timestamp,
            progress,
        }
    }
}

/// A stored update joined against its trip, route and stop.
///
/// Missing optional route attributes come back empty (or zero), never absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripUpdate {
    pub id: i32,
    pub trip: Trip,
    pub route: Route,
    pub stop: Stop,
    pub timestamp: DateTime<Utc>,
    pub progress: f64,
}

/// Identifiers-only row returned by the full history listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TripUpdateRecord {
    pub id: i32,
    pub trip_id: String,
    pub stop_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Reference tables in one document, loaded in foreign-key order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub stops: Vec<Stop>,
    #[serde(default)]
    pub trips: Vec<Trip>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_nulls_become_empty() {
        let route: Route =
            serde_json::from_str(r#"{"id": "A", "short_name": null, "color": null, "type": null}"#)
                .unwrap();

        assert_eq!(route.short_name, "");
        assert_eq!(route.color, "");
        assert_eq!(route.route_type, 0);
    }

    #[test]
    fn test_direction_from_feed_suffix() {
        assert_eq!(Direction::from("N"), Direction::Uptown);
        assert_eq!(Direction::from("downtown"), Direction::Downtown);
        assert_eq!(Direction::from("sideways"), Direction::Unknown);
    }

    #[test]
    fn test_new_update_needs_only_stop_id() {
        let update: NewTripUpdate = serde_json::from_str(
            r#"{"trip_id": "A1", "stop": {"id": "101N"}, "timestamp": "2024-05-01T12:00:00Z", "progress": 0.4}"#,
        )
        .unwrap();

        assert_eq!(update.stop, Stop::with_id("101N"));
        assert_eq!(update.progress, 0.4);
    }

    #[test]
    fn test_reference_document_defaults_missing_tables() {
        let data: ReferenceData =
            serde_json::from_str(r#"{"trips": [{"id": "A1", "route": "A", "direction": "uptown"}]}"#)
                .unwrap();

        assert!(data.routes.is_empty());
        assert_eq!(data.trips[0].direction, Direction::Uptown);
        assert_eq!(data.trips[0].route_id, "A");
    }
}
