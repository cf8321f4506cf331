use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use trip_tracker::Error;
use trip_tracker::ingest::Ingestor;
use trip_tracker::model::{Direction, NewTripUpdate, ReferenceData, Stop};
use trip_tracker::projection::project;
use trip_tracker::query::QueryEngine;
use trip_tracker::store::{InsertOutcome, MemoryStore, ReferenceStore, UpdateStore};

const REFERENCE: &str = r#"{
    "routes": [
        {"id": "A", "short_name": "A", "name": "8 Avenue Express", "type": 1, "color": "0039A6"},
        {"id": "GS", "short_name": null, "name": "42 St Shuttle", "color": null}
    ],
    "stops": [
        {"id": "A02N", "name": "Inwood-207 St", "latitude": 40.868072, "longitude": -73.919899, "station": "A02"},
        {"id": "A02S", "name": "Inwood-207 St", "latitude": 40.868072, "longitude": -73.919899, "station": "A02"},
        {"id": "A03N", "name": "Dyckman St", "latitude": 40.865491, "longitude": -73.927271, "station": "A03"},
        {"id": "901N", "name": "Grand Central-42 St", "latitude": 40.752769, "longitude": -73.979189, "station": "901"}
    ],
    "trips": [
        {"id": "A1", "route": "A", "direction": "uptown"},
        {"id": "A2", "route": "A", "direction": "downtown"},
        {"id": "GS1", "route": "GS", "direction": "uptown"},
        {"id": "X1", "route": null}
    ]
}"#;

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let data: ReferenceData = serde_json::from_str(REFERENCE).expect("valid reference document");
    store.load_reference(&data).await.expect("reference loads");
    store
}

#[tokio::test]
async fn test_duplicate_trip_stop_pair_is_recorded_once() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());
    let now = Utc::now();

    let first = ingestor
        .insert(&NewTripUpdate::new("A1", "A02N", now - TimeDelta::minutes(2), 0.4))
        .await
        .unwrap();
    let second = ingestor
        .insert(&NewTripUpdate::new("A1", "A02N", now, 0.9))
        .await
        .unwrap();

    assert!(matches!(first, InsertOutcome::Inserted { .. }));
    assert_eq!(second, InsertOutcome::AlreadyRecorded);

    let all = store.all_updates().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].timestamp, now - TimeDelta::minutes(2));

    let history = QueryEngine::new(store).by_trip_at("A1", now).await.unwrap();
    assert_eq!(history[0].progress, 0.4);
}

#[tokio::test]
async fn test_unknown_stop_is_healed_once() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());
    let stops_before = store.stop_count().await;
    let now = Utc::now();

    ingestor
        .insert(&NewTripUpdate::new("A1", "H19N", now, 0.1))
        .await
        .unwrap();
    let again = ingestor
        .insert(&NewTripUpdate::new("A1", "H19N", now, 0.2))
        .await
        .unwrap();

    assert_eq!(again, InsertOutcome::AlreadyRecorded);
    assert_eq!(store.stop_count().await, stops_before + 1);
    assert_eq!(store.stop("H19N").await, Some(Stop::with_id("H19N")));
    assert_eq!(store.all_updates().await.unwrap().len(), 1);

    // A different trip passing the healed stop needs no further heal.
    ingestor
        .insert(&NewTripUpdate::new("A2", "H19N", now, 0.3))
        .await
        .unwrap();
    assert_eq!(store.stop_count().await, stops_before + 1);
}

#[tokio::test]
async fn test_concurrent_heals_of_same_stop_all_succeed() {
    let store = seeded_store().await;
    let ingestor = Arc::new(Ingestor::new(store.clone()));
    let stops_before = store.stop_count().await;
    let now = Utc::now();

    let mut tasks = vec![];
    for _ in 0..8 {
        let ingestor = ingestor.clone();
        tasks.push(tokio::spawn(async move {
            ingestor
                .insert(&NewTripUpdate::new("A1", "R01N", now, 0.5))
                .await
        }));
    }

    let mut inserted = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            InsertOutcome::Inserted { .. } => inserted += 1,
            InsertOutcome::AlreadyRecorded => {}
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(store.stop_count().await, stops_before + 1);
    assert_eq!(store.all_updates().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_live_snapshot_and_trip_history_windows() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());
    let now = Utc::now();

    ingestor
        .insert(&NewTripUpdate::new("A1", "A02N", now - TimeDelta::minutes(30), 0.2))
        .await
        .unwrap();
    ingestor
        .insert(&NewTripUpdate::new("A1", "A03N", now - TimeDelta::minutes(5), 0.6))
        .await
        .unwrap();

    let engine = QueryEngine::new(store);

    let live = engine.live_at(now).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].stop.id, "A03N");

    let history = engine.by_trip_at("A1", now).await.unwrap();
    let stops: Vec<&str> = history.iter().map(|u| u.stop.id.as_str()).collect();
    assert_eq!(stops, vec!["A03N", "A02N"]);

    // Both rows fall out of the history window a day later.
    let tomorrow = now + TimeDelta::hours(24);
    assert!(engine.by_trip_at("A1", tomorrow).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_live_snapshot_keeps_latest_row_per_trip() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());
    let now = Utc::now();

    for (stop, minutes_ago) in [("A02N", 9), ("A03N", 1), ("901N", 4)] {
        ingestor
            .insert(&NewTripUpdate::new(
                "A1",
                stop,
                now - TimeDelta::minutes(minutes_ago),
                0.5,
            ))
            .await
            .unwrap();
    }
    ingestor
        .insert(&NewTripUpdate::new("A2", "A02S", now - TimeDelta::minutes(2), 0.1))
        .await
        .unwrap();

    let live = QueryEngine::new(store).live_at(now).await.unwrap();

    let rows: Vec<(&str, &str)> = live
        .iter()
        .map(|u| (u.trip.id.as_str(), u.stop.id.as_str()))
        .collect();
    assert_eq!(rows, vec![("A1", "A03N"), ("A2", "A02S")]);
    assert_eq!(live[0].trip.direction, Direction::Uptown);
    assert_eq!(live[0].route.name, "8 Avenue Express");
}

#[tokio::test]
async fn test_null_route_columns_hydrate_as_empty_strings() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());
    let now = Utc::now();

    ingestor
        .insert(&NewTripUpdate::new("GS1", "901N", now, 0.0))
        .await
        .unwrap();

    let engine = QueryEngine::new(store);
    let update = &engine.by_route_at("GS", now).await.unwrap()[0];
    assert_eq!(update.route.short_name, "");
    assert_eq!(update.route.color, "");
    assert_eq!(update.route.name, "42 St Shuttle");

    let json = serde_json::to_value(project(std::slice::from_ref(update))).unwrap();
    assert_eq!(json["features"][0]["properties"]["line"], "");
    assert_eq!(json["features"][0]["properties"]["color"], "");
}

#[tokio::test]
async fn test_projection_matches_query_output() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());
    let now = Utc::now();

    ingestor
        .insert(&NewTripUpdate::new("A1", "A02N", now - TimeDelta::minutes(1), 0.3))
        .await
        .unwrap();
    ingestor
        .insert(&NewTripUpdate::new("A2", "A02S", now - TimeDelta::minutes(3), 0.7))
        .await
        .unwrap();

    let updates = QueryEngine::new(store).by_station("A02").await.unwrap();
    let collection = project(&updates);

    assert_eq!(collection.features.len(), updates.len());
    let json = serde_json::to_value(&collection).unwrap();
    for (feature, update) in json["features"]
        .as_array()
        .unwrap()
        .iter()
        .zip(&updates)
    {
        assert_eq!(
            feature["geometry"]["coordinates"],
            serde_json::json!([update.stop.longitude, update.stop.latitude])
        );
        let properties = &feature["properties"];
        assert_eq!(properties["trip"], update.trip.id.as_str());
        assert_eq!(properties["stop"], update.stop.id.as_str());
        assert_eq!(properties["line"], "A");
        assert_eq!(properties["color"], "0039A6");
        assert_eq!(properties["direction"], update.trip.direction.as_str());
        assert!(properties["time"].is_string());
    }
}

#[tokio::test]
async fn test_first_sighting_of_stop_on_trip_without_route() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());
    let now = Utc::now();

    let outcome = ingestor
        .insert(&NewTripUpdate::new("X1", "101N", now, 0.4))
        .await
        .unwrap();
    assert!(matches!(outcome, InsertOutcome::Inserted { .. }));
    assert!(store.stop("101N").await.is_some());

    let live = QueryEngine::new(store).live_at(now).await.unwrap();
    let row = live.iter().find(|u| u.trip.id == "X1").unwrap();
    assert_eq!(row.stop.id, "101N");
    assert_eq!(row.progress, 0.4);
    assert_eq!(row.route.id, "");
    assert_eq!(row.route.short_name, "");
    assert_eq!(row.route.color, "");
}

#[tokio::test]
async fn test_unknown_trip_surfaces_as_integrity_error() {
    let store = seeded_store().await;
    let ingestor = Ingestor::new(store.clone());

    let err = ingestor
        .insert(&NewTripUpdate::new("NOPE", "A02N", Utc::now(), 0.0))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingTrip { .. }));
    assert!(store.all_updates().await.unwrap().is_empty());
}
