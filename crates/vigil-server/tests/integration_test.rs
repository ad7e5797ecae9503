//! End-to-end integration tests for Vigil Server
//!
//! Drives the full router: entity CRUD with reference checks, observation
//! reads and writes, reading publication through the ingestion pipeline,
//! administration and snapshot persistence.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::time::Duration as StdDuration;
use tower::Service;

use vigil_server::{create_router, AppState, ServerConfig};
use vigil_streaming::PipelineState;

/// Make a request with an optional JSON body and return the JSON response.
async fn send(app: &mut axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.call(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn get_json(app: &mut axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

async fn post_json(app: &mut axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(body)).await
}

async fn patch_json(app: &mut axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "PATCH", uri, Some(body)).await
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default().with_ingest_enabled(false);
    config.ingest.retry_base_ms = 1;
    config.ingest.retry_max_ms = 4;
    config.ingest.reconnect_base_ms = 1;
    config.ingest.reconnect_max_ms = 4;
    config
}

fn test_app() -> (AppState, axum::Router) {
    let state = AppState::new(test_config()).unwrap();
    let app = create_router(state.clone());
    (state, app)
}

/// Thing `thing-17` measuring `temp-prop` through datastream `ds-temp`.
async fn seed_datastream(app: &mut axum::Router) {
    let (status, _) = post_json(app, "/v1.0/Things", json!({"id": "thing-17", "name": "Boiler room"})).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = post_json(
        app,
        "/v1.0/Sensors",
        json!({"id": "sensor-1", "name": "PT100", "metadata": "https://example.org/pt100.pdf"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = post_json(
        app,
        "/v1.0/ObservedProperties",
        json!({"id": "temp-prop", "name": "Temperature", "definition": "http://vocab.example.org/temperature"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = post_json(
        app,
        "/v1.0/Datastreams",
        json!({
            "id": "ds-temp",
            "name": "Boiler temperature",
            "unitOfMeasurement": {"name": "degree Celsius", "symbol": "C"},
            "Thing": {"@iot.id": "thing-17"},
            "Sensor": {"@iot.id": "sensor-1"},
            "ObservedProperty": {"@iot.id": "temp-prop"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
}

async fn post_reading(app: &mut axum::Router, minute: u32, result: f64) -> (StatusCode, Value) {
    post_json(
        app,
        "/v1.0/Observations",
        json!({
            "phenomenonTime": format!("2024-03-01T10:{:02}:00Z", minute),
            "result": result,
            "Datastream": {"@iot.id": "ds-temp"}
        }),
    )
    .await
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_reports_service_state() {
    let (_, mut app) = test_app();
    let (status, body) = get_json(&mut app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["observations"], 0);
    assert_eq!(body["persistence"], false);
    assert!(body["ingestion"].is_null());
}

// =============================================================================
// Entities
// =============================================================================

#[tokio::test]
async fn test_entity_crud_flow() {
    let (_, mut app) = test_app();
    seed_datastream(&mut app).await;

    let (status, body) = get_json(&mut app, "/v1.0/Datastreams/ds-temp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thing_id"], "thing-17");
    assert_eq!(body["sensor_id"], "sensor-1");
    assert_eq!(
        body["observationType"],
        "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement"
    );

    let (status, body) = get_json(&mut app, "/v1.0/Things/thing-17/Datastreams").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["@iot.count"], 1);
    assert_eq!(body["value"][0]["id"], "ds-temp");

    let (status, body) = patch_json(&mut app, "/v1.0/Things/thing-17", json!({"description": "Basement"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "Basement");
    assert_eq!(body["name"], "Boiler room");

    // Generated ids carry the entity prefix
    let (status, body) = post_json(&mut app, "/v1.0/Things", json!({"name": "Roof"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["id"].as_str().unwrap().starts_with("thing-"));

    let (_, body) = get_json(&mut app, "/v1.0/Things?$top=1").await;
    assert_eq!(body["@iot.count"], 2);
    assert_eq!(body["value"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_locations_link_things() {
    let (_, mut app) = test_app();
    seed_datastream(&mut app).await;

    let (status, location) = post_json(
        &mut app,
        "/v1.0/Locations",
        json!({
            "name": "Plant 1",
            "location": {"type": "Point", "coordinates": [-122.33, 47.61]},
            "Things": [{"@iot.id": "thing-17"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", location);
    assert_eq!(location["encodingType"], "application/geo+json");
    let location_id = location["id"].as_str().unwrap().to_string();

    let (_, body) = get_json(&mut app, "/v1.0/Things/thing-17/Locations").await;
    assert_eq!(body["@iot.count"], 1);
    let (_, body) = get_json(&mut app, &format!("/v1.0/Locations/{}/Things", location_id)).await;
    assert_eq!(body["value"][0]["id"], "thing-17");

    // Deleting the location unlinks it
    let (status, _) = send(&mut app, "DELETE", &format!("/v1.0/Locations/{}", location_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get_json(&mut app, "/v1.0/Things/thing-17/Locations").await;
    assert_eq!(body["@iot.count"], 0);
}

#[tokio::test]
async fn test_invalid_geometry_is_rejected() {
    let (_, mut app) = test_app();
    let (status, body) = post_json(
        &mut app,
        "/v1.0/FeaturesOfInterest",
        json!({"name": "Field", "feature": {"type": "Point", "coordinates": ["east", "north"]}}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn test_reference_errors() {
    let (_, mut app) = test_app();
    seed_datastream(&mut app).await;

    // Missing required reference
    let (status, body) = post_json(
        &mut app,
        "/v1.0/Datastreams",
        json!({"unitOfMeasurement": {}, "Sensor": {"@iot.id": "sensor-1"}, "ObservedProperty": {"@iot.id": "temp-prop"}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    // Reference to a missing entity
    let (status, body) = post_json(
        &mut app,
        "/v1.0/Datastreams",
        json!({
            "unitOfMeasurement": {},
            "Thing": {"@iot.id": "thing-404"},
            "Sensor": {"@iot.id": "sensor-1"},
            "ObservedProperty": {"@iot.id": "temp-prop"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("thing-404"));

    // Duplicate id
    let (status, _) = post_json(&mut app, "/v1.0/Things", json!({"id": "thing-17", "name": "Again"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Referenced entities cannot be deleted
    let (status, _) = send(&mut app, "DELETE", "/v1.0/Things/thing-17", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&mut app, "DELETE", "/v1.0/Sensors/sensor-1", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = get_json(&mut app, "/v1.0/Sensors/sensor-404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post_json(&mut app, "/v1.0/Things", json!({"description": "no name"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Observations
// =============================================================================

#[tokio::test]
async fn test_observation_range_and_pagination() {
    let (_, mut app) = test_app();
    seed_datastream(&mut app).await;

    // Out of order on purpose
    for (minute, result) in [(3, 21.5), (0, 20.0), (4, 22.0), (1, 20.5), (2, 21.0)] {
        let (status, body) = post_reading(&mut app, minute, result).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
    }

    let (status, body) = get_json(&mut app, "/v1.0/Observations?datastream_id=ds-temp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["@iot.count"], 5);
    assert_eq!(body["value"][0]["phenomenonTime"], "2024-03-01T10:04:00Z");

    // Closed range, ascending
    let (_, body) = get_json(
        &mut app,
        "/v1.0/Observations?datastream_id=ds-temp&start=2024-03-01T10:01:00Z&end=2024-03-01T10:03:00Z&order=asc",
    )
    .await;
    assert_eq!(body["@iot.count"], 3);
    let results: Vec<f64> = body["value"].as_array().unwrap().iter().map(|o| o["result"].as_f64().unwrap()).collect();
    assert_eq!(results, vec![20.5, 21.0, 21.5]);

    // The count covers the predicate, not the page
    for query in ["$top=2&$skip=1", "top=2&skip=1", "limit=2&offset=1"] {
        let (_, body) = get_json(&mut app, &format!("/v1.0/Datastreams/ds-temp/Observations?{}", query)).await;
        assert_eq!(body["@iot.count"], 5, "{}", query);
        let page: Vec<f64> = body["value"].as_array().unwrap().iter().map(|o| o["result"].as_f64().unwrap()).collect();
        assert_eq!(page, vec![21.5, 21.0], "{}", query);
    }

    let (status, _) = get_json(
        &mut app,
        "/v1.0/Observations?start=2024-03-01T11:00:00Z&end=2024-03-01T10:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get_json(&mut app, "/v1.0/Observations?order=sideways").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get_json(&mut app, "/v1.0/Datastreams/ds-404/Observations").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_observation_conflicts() {
    let (state, mut app) = test_app();
    seed_datastream(&mut app).await;

    let (status, _) = post_reading(&mut app, 0, 21.5).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = post_reading(&mut app, 0, 99.0).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
    assert_eq!(state.store.count_for_datastream("ds-temp"), 1);

    let (status, _) = post_json(
        &mut app,
        "/v1.0/Observations",
        json!({"result": 1.0, "datastream_id": "ds-temp"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "phenomenonTime is required");
}

#[tokio::test]
async fn test_batch_reports_each_item() {
    let (state, mut app) = test_app();
    seed_datastream(&mut app).await;

    let (status, body) = post_json(
        &mut app,
        "/v1.0/Observations/batch",
        json!([
            {"phenomenonTime": "2024-03-01T10:00:00Z", "result": 20.0, "datastream_id": "ds-temp"},
            {"phenomenonTime": "2024-03-01T10:00:00Z", "result": 20.1, "datastream_id": "ds-temp"},
            {"phenomenonTime": "2024-03-01T10:01:00Z", "result": "warm", "datastream_id": "ds-temp"},
            {"phenomenonTime": "2024-03-01T10:02:00Z", "result": 20.2, "datastream_id": "ds-404"},
            {"phenomenonTime": "2024-03-01T10:03:00Z", "result": 20.3, "Datastream": {"@iot.id": "ds-temp"}}
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 2);
    assert_eq!(body["failed"], 3);
    let statuses: Vec<u64> = body["results"].as_array().unwrap().iter().map(|r| r["status"].as_u64().unwrap()).collect();
    assert_eq!(statuses, vec![201, 409, 400, 404, 201]);
    assert_eq!(state.store.count_for_datastream("ds-temp"), 2);
}

#[tokio::test]
async fn test_observation_annotations_only() {
    let (_, mut app) = test_app();
    seed_datastream(&mut app).await;
    let (_, created) = post_reading(&mut app, 0, 21.5).await;
    let id = created["@iot.id"].as_u64().unwrap();
    let uri = format!("/v1.0/Observations/{}", id);

    let (status, body) = patch_json(
        &mut app,
        &uri,
        json!({"resultQuality": "suspect", "parameters": {"calibrated": false}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resultQuality"], "suspect");
    assert_eq!(body["result"], 21.5);

    let (status, _) = patch_json(&mut app, &uri, json!({"result": 30.0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = get_json(&mut app, &uri).await;
    assert_eq!(body["result"], 21.5);
    assert_eq!(body["parameters"]["calibrated"], false);

    let (status, _) = get_json(&mut app, "/v1.0/Observations/999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_json(&mut app, "/v1.0/Observations/not-a-number").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_feature_of_interest_observations() {
    let (_, mut app) = test_app();
    seed_datastream(&mut app).await;

    let (status, _) = post_json(
        &mut app,
        "/v1.0/FeaturesOfInterest",
        json!({"id": "foi-boiler", "name": "Boiler", "feature": {"type": "Point", "coordinates": [8.5, 47.3]}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = post_json(
        &mut app,
        "/v1.0/Observations",
        json!({
            "phenomenonTime": "2024-03-01T10:00:00Z",
            "result": 21.5,
            "Datastream": {"@iot.id": "ds-temp"},
            "FeatureOfInterest": {"@iot.id": "foi-boiler"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    post_reading(&mut app, 1, 22.0).await;

    let (_, body) = get_json(&mut app, "/v1.0/FeaturesOfInterest/foi-boiler/Observations").await;
    assert_eq!(body["@iot.count"], 1);

    let (status, _) = send(&mut app, "DELETE", "/v1.0/FeaturesOfInterest/foi-boiler", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_datastream_delete_cascades() {
    let (state, mut app) = test_app();
    seed_datastream(&mut app).await;
    let (_, created) = post_reading(&mut app, 0, 21.5).await;
    post_reading(&mut app, 1, 22.0).await;

    // References are frozen once observations exist
    let (status, _) = patch_json(
        &mut app,
        "/v1.0/Datastreams/ds-temp",
        json!({"Sensor": {"@iot.id": "sensor-1"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&mut app, "DELETE", "/v1.0/Datastreams/ds-temp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["observations_deleted"], 2);

    let (status, _) = get_json(&mut app, &format!("/v1.0/Observations/{}", created["@iot.id"])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(state.store.is_empty());

    // With no datastream left the thing can go
    let (status, _) = send(&mut app, "DELETE", "/v1.0/Things/thing-17", None).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Reading Ingress
// =============================================================================

async fn wait_for<F: Fn(&AppState) -> bool>(state: &AppState, condition: F) {
    for _ in 0..500 {
        if condition(state) {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    panic!("condition not reached: {:?}", state.pipeline_health());
}

#[tokio::test]
async fn test_published_reading_is_ingested() {
    let state = AppState::new(test_config().with_ingest_enabled(true)).unwrap();
    let mut app = create_router(state.clone());
    seed_datastream(&mut app).await;

    let handle = state.start_ingestion().unwrap();
    wait_for(&state, |s| s.pipeline_health().map(|h| h.state) == Some(PipelineState::Subscribed)).await;

    let reading = json!({"topic": "iot/thing-17/temp-prop", "payload": {"result": 21.5, "phenomenonTime": "2024-03-01T10:00:00Z"}});
    let (status, body) = post_json(&mut app, "/v1.0/ingest/publish", reading.clone()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["receivers"], 1);
    wait_for(&state, |s| s.pipeline_health().map_or(false, |h| h.stored == 1)).await;

    // Same reading again is a duplicate
    post_json(&mut app, "/v1.0/ingest/publish", reading).await;
    wait_for(&state, |s| s.pipeline_health().map_or(false, |h| h.duplicates == 1)).await;

    // Nothing matches this property
    post_json(
        &mut app,
        "/v1.0/ingest/publish",
        json!({"topic": "iot/thing-17/humidity", "payload": {"result": 40.0}}),
    )
    .await;
    post_json(
        &mut app,
        "/v1.0/ingest/publish",
        json!({"topic": "iot/thing-17/temp-prop", "payload": "{\"result\": \"n/a\"}"}),
    )
    .await;
    wait_for(&state, |s| {
        s.pipeline_health().map_or(false, |h| h.unresolved == 1 && h.malformed == 1)
    })
    .await;

    let (_, body) = get_json(&mut app, "/v1.0/Datastreams/ds-temp/Observations").await;
    assert_eq!(body["@iot.count"], 1);
    assert_eq!(body["value"][0]["raw"]["result"], 21.5);

    let (_, health) = get_json(&mut app, "/health").await;
    assert_eq!(health["ingestion"]["state"], "subscribed");
    assert_eq!(health["ingestion"]["stored"], 1);

    let stopped = handle.stop().await;
    assert_eq!(stopped.state, PipelineState::Stopped);
    let (_, health) = get_json(&mut app, "/health").await;
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_publish_rejects_wildcard_topic() {
    let (_, mut app) = test_app();
    let (status, body) = post_json(
        &mut app,
        "/v1.0/ingest/publish",
        json!({"topic": "iot/+/temp", "payload": {"result": 1.0}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

// =============================================================================
// Administration
// =============================================================================

#[tokio::test]
async fn test_admin_store_and_compression() {
    let (_, mut app) = test_app();
    seed_datastream(&mut app).await;

    let old = (Utc::now() - Duration::days(800)).to_rfc3339();
    let (status, created) = post_json(
        &mut app,
        "/v1.0/Observations",
        json!({"phenomenonTime": old, "result": 18.25, "datastream_id": "ds-temp"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    post_reading(&mut app, 0, 21.5).await;

    let (status, body) = get_json(&mut app, "/v1.0/admin/store").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"]["observations"], 2);
    assert_eq!(body["store"]["schema_version"], 5);
    assert_eq!(body["catalog"]["datastreams"], 1);
    assert!(body["storage_size"].as_str().unwrap().ends_with('B'));
    assert!(body["schema"]["indexes"].as_array().unwrap().iter().any(|i| i["name"] == "idx_observations_datastream_time"));

    let (status, report) = post_json(&mut app, "/v1.0/admin/compress", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["chunks_compressed"], 1);
    assert_eq!(report["rows_compressed"], 1);

    // Idempotent
    let (_, report) = post_json(&mut app, "/v1.0/admin/compress", json!({})).await;
    assert_eq!(report["chunks_compressed"], 0);

    // Compressed rows stay readable and annotatable
    let uri = format!("/v1.0/Observations/{}", created["@iot.id"]);
    let (status, body) = patch_json(&mut app, &uri, json!({"resultQuality": "archived"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], 18.25);
    let (_, body) = get_json(&mut app, "/v1.0/Datastreams/ds-temp/Observations").await;
    assert_eq!(body["@iot.count"], 2);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config().with_data_dir(Some(dir.path().to_string_lossy().into_owned()));

    let state = AppState::new(config.clone()).unwrap();
    assert!(state.persistence_enabled());
    let mut app = create_router(state.clone());
    seed_datastream(&mut app).await;
    for minute in 0..3 {
        post_reading(&mut app, minute, 20.0 + minute as f64).await;
    }
    state.save_in_background().await.unwrap();

    let restarted = AppState::new(config).unwrap();
    let mut app = create_router(restarted.clone());

    let (status, body) = get_json(&mut app, "/v1.0/Datastreams/ds-temp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Boiler temperature");
    let (_, body) = get_json(&mut app, "/v1.0/Datastreams/ds-temp/Observations?order=asc").await;
    assert_eq!(body["@iot.count"], 3);
    assert_eq!(body["value"][0]["result"], 20.0);

    // Uniqueness and the id sequence carry over
    let (status, _) = post_reading(&mut app, 0, 99.0).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, created) = post_reading(&mut app, 9, 23.0).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["@iot.id"].as_u64().unwrap() > 3);
}
