//! Vigil Request Handlers
//!
//! HTTP handlers for the `/v1.0` entity sets, observation reads and writes,
//! reading publication, health and store administration. Request bodies
//! follow SensorThings conventions: navigation links such as
//! `"Thing": {"@iot.id": "thing-17"}` are accepted wherever a foreign key
//! field is.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use vigil_catalog::{
    CatalogStats, Datastream, DatastreamCreate, DatastreamPatch, FeatureOfInterest, FeatureOfInterestCreate,
    FeatureOfInterestPatch, Location, LocationCreate, LocationPatch, ObservationCreate, ObservationQuery,
    ObservedProperty, ObservedPropertyCreate, ObservedPropertyPatch, Sensor, SensorCreate, SensorPatch, Thing,
    ThingCreate, ThingPatch,
};
use vigil_common::{format_size, ObservationId, Page, SortOrder, VigilError};
use vigil_streaming::{BrokerStats, Message, PipelineHealth};
use vigil_timeseries::{AnnotationUpdate, CompressionReport, Observation, SchemaState, StoreStats};

// =============================================================================
// Request Plumbing
// =============================================================================

/// Navigation links accepted in Thing bodies.
const THING_LINKS: &[(&str, &str)] = &[("Locations", "location_ids")];
const LOCATION_LINKS: &[(&str, &str)] = &[("Things", "thing_ids")];
const DATASTREAM_LINKS: &[(&str, &str)] = &[
    ("Thing", "thing_id"),
    ("Sensor", "sensor_id"),
    ("ObservedProperty", "observed_property_id"),
];
const OBSERVATION_LINKS: &[(&str, &str)] = &[
    ("Datastream", "datastream_id"),
    ("FeatureOfInterest", "feature_of_interest_id"),
];

/// Observation fields a PATCH may carry.
const MUTABLE_OBSERVATION_FIELDS: &[&str] = &["resultQuality", "result_quality", "parameters"];

fn link_id(link: &Value) -> Option<String> {
    match link {
        Value::String(id) => Some(id.clone()),
        Value::Object(map) => map
            .get("@iot.id")
            .or_else(|| map.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Rewrite navigation links into their foreign key fields. An explicit
/// foreign key field wins over a link.
fn resolve_links(mut body: Value, links: &[(&str, &str)]) -> ApiResult<Value> {
    let Some(map) = body.as_object_mut() else {
        return Err(VigilError::validation("request body must be a JSON object").into());
    };

    for (navigation, field) in links {
        let Some(link) = map.remove(*navigation) else {
            continue;
        };
        let resolved = match &link {
            Value::Null => continue,
            Value::Array(items) => items
                .iter()
                .map(link_id)
                .collect::<Option<Vec<_>>>()
                .map(|ids| Value::Array(ids.into_iter().map(Value::String).collect())),
            single => link_id(single).map(Value::String),
        };
        let resolved = resolved.ok_or_else(|| {
            VigilError::validation(format!("{} must reference entities by \"@iot.id\"", navigation))
        })?;
        map.entry(field.to_string()).or_insert(resolved);
    }

    Ok(body)
}

fn parse_value<T: DeserializeOwned>(body: Value, links: &[(&str, &str)]) -> ApiResult<T> {
    let body = resolve_links(body, links)?;
    serde_json::from_value(body).map_err(|e| VigilError::validation(e.to_string()).into())
}

fn parse_body<T: DeserializeOwned>(
    payload: Result<Json<Value>, JsonRejection>,
    links: &[(&str, &str)],
) -> ApiResult<T> {
    let Json(body) = payload?;
    parse_value(body, links)
}

// =============================================================================
// Listing and Pagination
// =============================================================================

/// Collection response: `{"@iot.count": total, "value": [...]}`.
#[derive(Debug, Serialize)]
pub struct Listing<T> {
    #[serde(rename = "@iot.count")]
    pub count: usize,
    pub value: Vec<T>,
}

impl<T> From<Page<T>> for Listing<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            count: page.count,
            value: page.items,
        }
    }
}

/// Page window. `$top`/`$skip`, `top`/`skip` and `limit`/`offset` are
/// accepted, in that order of precedence.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "$top")]
    pub dollar_top: Option<usize>,
    #[serde(rename = "$skip")]
    pub dollar_skip: Option<usize>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListParams {
    pub fn limit(&self) -> Option<usize> {
        self.dollar_top.or(self.top).or(self.limit)
    }

    pub fn offset(&self) -> Option<usize> {
        self.dollar_skip.or(self.skip).or(self.offset)
    }
}

/// Observation filters plus the page window. The window fields are repeated
/// rather than flattened; flattening breaks numeric query parsing.
#[derive(Debug, Default, Deserialize)]
pub struct ObservationParams {
    pub datastream_id: Option<String>,
    pub feature_of_interest_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub order: Option<SortOrder>,
    #[serde(rename = "$top")]
    pub dollar_top: Option<usize>,
    #[serde(rename = "$skip")]
    pub dollar_skip: Option<usize>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ObservationParams {
    fn window(&self) -> ListParams {
        ListParams {
            dollar_top: self.dollar_top,
            dollar_skip: self.dollar_skip,
            top: self.top,
            skip: self.skip,
            limit: self.limit,
            offset: self.offset,
        }
    }

    fn into_query(self) -> ObservationQuery {
        let window = self.window();
        ObservationQuery {
            datastream_id: self.datastream_id,
            feature_of_interest_id: self.feature_of_interest_id,
            start: self.start,
            end: self.end,
            order: self.order.unwrap_or_default(),
            offset: window.offset(),
            limit: window.limit(),
        }
    }
}

fn page_of(state: &AppState, params: Result<Query<ListParams>, QueryRejection>) -> ApiResult<vigil_common::PageRequest> {
    let Query(params) = params?;
    Ok(state.queries.page_request(params.offset(), params.limit()))
}

fn deleted(entity: &str, id: &str) -> Json<Value> {
    Json(json!({
        "message": format!("{} deleted", entity),
        "@iot.id": id,
    }))
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
    pub observations: usize,
    pub persistence: bool,
    pub ingestion: Option<PipelineHealth>,
}

/// Health check endpoint. Degraded when the ingestion pipeline has stopped.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ingestion = state.pipeline_health();
    let degraded = ingestion
        .as_ref()
        .map_or(false, |h| h.state == vigil_streaming::PipelineState::Stopped);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        observations: state.store.len(),
        persistence: state.persistence_enabled(),
        ingestion,
    })
}

/// Not found handler.
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not_found", "message": "no such route"})),
    )
}

// =============================================================================
// Things
// =============================================================================

pub async fn list_things(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Thing>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.catalog.list_things(page).into()))
}

pub async fn create_thing(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Thing>)> {
    let input: ThingCreate = parse_body(payload, THING_LINKS)?;
    let thing = state.catalog.create_thing(input)?;
    tracing::info!(id = %thing.id, "Created thing");
    Ok((StatusCode::CREATED, Json(thing)))
}

pub async fn get_thing(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Thing>> {
    Ok(Json(state.catalog.get_thing(&id)?))
}

pub async fn update_thing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Thing>> {
    let patch: ThingPatch = parse_body(payload, THING_LINKS)?;
    Ok(Json(state.catalog.update_thing(&id, patch)?))
}

pub async fn delete_thing(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.catalog.delete_thing(&id)?;
    tracing::info!(%id, "Deleted thing");
    Ok(deleted("Thing", &id))
}

pub async fn thing_datastreams(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Datastream>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.queries.datastreams_of_thing(&id, page)?.into()))
}

pub async fn thing_locations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Location>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.queries.locations_of_thing(&id, page)?.into()))
}

// =============================================================================
// Locations
// =============================================================================

pub async fn list_locations(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Location>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.catalog.list_locations(page).into()))
}

pub async fn create_location(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Location>)> {
    let input: LocationCreate = parse_body(payload, LOCATION_LINKS)?;
    let location = state.catalog.create_location(input)?;
    Ok((StatusCode::CREATED, Json(location)))
}

pub async fn get_location(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Location>> {
    Ok(Json(state.catalog.get_location(&id)?))
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Location>> {
    let patch: LocationPatch = parse_body(payload, &[])?;
    Ok(Json(state.catalog.update_location(&id, patch)?))
}

pub async fn delete_location(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.catalog.delete_location(&id)?;
    Ok(deleted("Location", &id))
}

pub async fn location_things(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Thing>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.queries.things_of_location(&id, page)?.into()))
}

// =============================================================================
// Sensors
// =============================================================================

pub async fn list_sensors(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Sensor>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.catalog.list_sensors(page).into()))
}

pub async fn create_sensor(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Sensor>)> {
    let input: SensorCreate = parse_body(payload, &[])?;
    Ok((StatusCode::CREATED, Json(state.catalog.create_sensor(input)?)))
}

pub async fn get_sensor(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Sensor>> {
    Ok(Json(state.catalog.get_sensor(&id)?))
}

pub async fn update_sensor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Sensor>> {
    let patch: SensorPatch = parse_body(payload, &[])?;
    Ok(Json(state.catalog.update_sensor(&id, patch)?))
}

pub async fn delete_sensor(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.catalog.delete_sensor(&id)?;
    Ok(deleted("Sensor", &id))
}

pub async fn sensor_datastreams(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Datastream>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.queries.datastreams_of_sensor(&id, page)?.into()))
}

// =============================================================================
// Observed Properties
// =============================================================================

pub async fn list_observed_properties(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<ObservedProperty>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.catalog.list_observed_properties(page).into()))
}

pub async fn create_observed_property(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ObservedProperty>)> {
    let input: ObservedPropertyCreate = parse_body(payload, &[])?;
    Ok((StatusCode::CREATED, Json(state.catalog.create_observed_property(input)?)))
}

pub async fn get_observed_property(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ObservedProperty>> {
    Ok(Json(state.catalog.get_observed_property(&id)?))
}

pub async fn update_observed_property(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<ObservedProperty>> {
    let patch: ObservedPropertyPatch = parse_body(payload, &[])?;
    Ok(Json(state.catalog.update_observed_property(&id, patch)?))
}

pub async fn delete_observed_property(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.catalog.delete_observed_property(&id)?;
    Ok(deleted("ObservedProperty", &id))
}

pub async fn observed_property_datastreams(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Datastream>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.queries.datastreams_of_observed_property(&id, page)?.into()))
}

// =============================================================================
// Features of Interest
// =============================================================================

pub async fn list_features(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<FeatureOfInterest>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.catalog.list_features(page).into()))
}

pub async fn create_feature(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FeatureOfInterest>)> {
    let input: FeatureOfInterestCreate = parse_body(payload, &[])?;
    Ok((StatusCode::CREATED, Json(state.catalog.create_feature(input)?)))
}

pub async fn get_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FeatureOfInterest>> {
    Ok(Json(state.catalog.get_feature(&id)?))
}

pub async fn update_feature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<FeatureOfInterest>> {
    let patch: FeatureOfInterestPatch = parse_body(payload, &[])?;
    Ok(Json(state.catalog.update_feature(&id, patch)?))
}

pub async fn delete_feature(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.catalog.delete_feature(&id)?;
    Ok(deleted("FeatureOfInterest", &id))
}

pub async fn feature_observations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ObservationParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Observation>>> {
    let Query(params) = params?;
    let query = params.into_query();
    Ok(Json(state.queries.observations_of_feature(&id, &query)?.into()))
}

// =============================================================================
// Datastreams
// =============================================================================

pub async fn list_datastreams(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Datastream>>> {
    let page = page_of(&state, params)?;
    Ok(Json(state.catalog.list_datastreams(page).into()))
}

pub async fn create_datastream(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Datastream>)> {
    let input: DatastreamCreate = parse_body(payload, DATASTREAM_LINKS)?;
    let datastream = state.catalog.create_datastream(input)?;
    tracing::info!(
        id = %datastream.id,
        thing = %datastream.thing_id,
        observed_property = %datastream.observed_property_id,
        "Created datastream"
    );
    Ok((StatusCode::CREATED, Json(datastream)))
}

pub async fn get_datastream(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Datastream>> {
    Ok(Json(state.catalog.get_datastream(&id)?))
}

pub async fn update_datastream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Datastream>> {
    let patch: DatastreamPatch = parse_body(payload, DATASTREAM_LINKS)?;
    Ok(Json(state.catalog.update_datastream(&id, patch)?))
}

/// Deleting a datastream removes its observations.
pub async fn delete_datastream(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let purged = state.catalog.delete_datastream(&id)?;
    tracing::info!(%id, observations = purged, "Deleted datastream");
    Ok(Json(json!({
        "message": "Datastream deleted",
        "@iot.id": id,
        "observations_deleted": purged,
    })))
}

pub async fn datastream_observations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ObservationParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Observation>>> {
    let Query(params) = params?;
    let query = params.into_query();
    Ok(Json(state.queries.observations_of_datastream(&id, &query)?.into()))
}

// =============================================================================
// Observations
// =============================================================================

pub async fn list_observations(
    State(state): State<AppState>,
    params: Result<Query<ObservationParams>, QueryRejection>,
) -> ApiResult<Json<Listing<Observation>>> {
    let Query(params) = params?;
    let query = params.into_query();
    Ok(Json(state.queries.observations(&query)?.into()))
}

pub async fn create_observation(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Observation>)> {
    let input: ObservationCreate = parse_body(payload, OBSERVATION_LINKS)?;
    let observation = state.catalog.create_observation(input)?;
    Ok((StatusCode::CREATED, Json(observation)))
}

/// Outcome of one item of a batch write.
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchItem {
    fn created(observation: Observation) -> Self {
        Self {
            status: StatusCode::CREATED.as_u16(),
            observation: Some(observation),
            error: None,
            message: None,
        }
    }

    fn failed(err: ApiError) -> Self {
        Self {
            status: err.status().as_u16(),
            observation: None,
            error: Some(err.0.kind().to_string()),
            message: Some(err.0.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub created: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

/// Write many observations; each item succeeds or fails on its own and
/// results keep the request order.
pub async fn create_observation_batch(
    State(state): State<AppState>,
    payload: Result<Json<Vec<Value>>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let Json(items) = payload?;

    let mut results: Vec<Option<BatchItem>> = (0..items.len()).map(|_| None).collect();
    let mut positions = Vec::with_capacity(items.len());
    let mut inputs = Vec::with_capacity(items.len());

    for (position, item) in items.into_iter().enumerate() {
        match parse_value::<ObservationCreate>(item, OBSERVATION_LINKS) {
            Ok(input) => {
                positions.push(position);
                inputs.push(input);
            }
            Err(e) => results[position] = Some(BatchItem::failed(e)),
        }
    }

    let outcomes = state.catalog.create_observations(inputs);
    for (position, outcome) in positions.into_iter().zip(outcomes) {
        results[position] = Some(match outcome {
            Ok(observation) => BatchItem::created(observation),
            Err(e) => BatchItem::failed(ApiError(e)),
        });
    }

    let results: Vec<BatchItem> = results.into_iter().flatten().collect();
    let created = results.iter().filter(|r| r.observation.is_some()).count();
    let failed = results.len() - created;
    if failed > 0 {
        tracing::debug!(created, failed, "Batch write partially rejected");
    }

    Ok(Json(BatchResponse {
        created,
        failed,
        results,
    }))
}

pub async fn get_observation(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult<Json<Observation>> {
    let Path(id) = id?;
    Ok(Json(state.catalog.get_observation(ObservationId(id))?))
}

/// Only `resultQuality` and `parameters` can change after insert.
pub async fn update_observation(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<Json<Observation>> {
    let Path(id) = id?;
    let Json(body) = payload?;

    if let Some(field) = body.keys().find(|k| !MUTABLE_OBSERVATION_FIELDS.contains(&k.as_str())) {
        return Err(VigilError::validation(format!(
            "observation field {:?} is immutable; only resultQuality and parameters can be changed",
            field
        ))
        .into());
    }

    let update: AnnotationUpdate = parse_value(Value::Object(body), &[])?;
    Ok(Json(state.catalog.update_observation(ObservationId(id), update)?))
}

// =============================================================================
// Reading Ingress
// =============================================================================

/// A raw reading to publish on the in-process broker.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    /// JSON reading, or a string sent verbatim.
    pub payload: Value,
}

/// Publish a reading for the ingestion pipeline. Acceptance does not mean
/// the reading was stored; pipeline counters report the outcome.
pub async fn publish_reading(
    State(state): State<AppState>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;
    let bytes = match request.payload {
        Value::String(text) => text.into_bytes(),
        other => serde_json::to_vec(&other).map_err(|e| VigilError::Serialization(e.to_string()))?,
    };

    let receivers = state
        .broker
        .publish(Message::new(request.topic.clone(), bytes))
        .map_err(VigilError::from)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "topic": request.topic,
            "receivers": receivers,
        })),
    ))
}

// =============================================================================
// Administration
// =============================================================================

#[derive(Debug, Serialize)]
pub struct StoreReport {
    pub store: StoreStats,
    /// Hot plus compressed chunk footprint, human readable.
    pub storage_size: String,
    pub schema: SchemaState,
    pub catalog: CatalogStats,
    pub broker: BrokerStats,
}

pub async fn get_store_stats(State(state): State<AppState>) -> Json<StoreReport> {
    let store = state.store.stats();
    Json(StoreReport {
        storage_size: format_size(store.chunks.total_bytes as u64),
        store,
        schema: state.store.schema(),
        catalog: state.catalog.stats(),
        broker: state.broker.stats(),
    })
}

/// Run the compression policy now instead of waiting for the job.
pub async fn run_compression(State(state): State<AppState>) -> ApiResult<Json<CompressionReport>> {
    let store = state.store.clone();
    let report = tokio::task::spawn_blocking(move || store.compress_eligible(Utc::now()))
        .await
        .map_err(|e| VigilError::Internal(format!("compression task failed: {}", e)))??;

    tracing::info!(
        chunks = report.chunks_compressed,
        rows = report.rows_compressed,
        size = %report.size_change(),
        "Manual compression pass"
    );
    Ok(Json(report))
}

// =============================================================================
// Tests
// =============================================================================
