//! GeoJSON output for mapping clients.
//!
//! Property names (`trip`, `stop`, `line`, `color`, `time`, `direction`) are
//! read by the map front end and must stay stable.

use chrono::SecondsFormat;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};

use crate::model::TripUpdate;

/// One point feature per update, at the update's stop.
pub fn project(updates: &[TripUpdate]) -> FeatureCollection {
    let features = updates.iter().map(to_feature).collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn to_feature(update: &TripUpdate) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("trip".to_string(), update.trip.id.clone().into());
    properties.insert("stop".to_string(), update.stop.id.clone().into());
    properties.insert("line".to_string(), update.route.short_name.clone().into());
    properties.insert("color".to_string(), update.route.color.clone().into());
    properties.insert(
        "time".to_string(),
        update
            .timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
            .into(),
    );
    properties.insert(
        "direction".to_string(),
        update.trip.direction.as_str().into(),
    );

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![
            update.stop.longitude,
            update.stop.latitude,
        ]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}
