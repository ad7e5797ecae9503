//! Vigil Catalog
//!
//! Durable store of the reference entities and their relationships.
//! Every write validates its foreign keys before touching any table, and
//! deletions follow fixed policies:
//!
//! - Thing, Sensor, ObservedProperty: rejected while a Datastream refers to it
//! - Datastream: cascades to its Observations
//! - FeatureOfInterest: rejected while Observations refer to it
//! - Location: unlinked from every Thing
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::collection::EntityTable;
use crate::entities::*;
use crate::geometry::validate_geometry;
use crate::resolver::ReadingAddress;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use vigil_common::{ObservationId, Page, PageRequest, Result, VigilError};
use vigil_timeseries::{AnnotationUpdate, NewObservation, Observation, TimeSeriesStore};

// =============================================================================
// Observation Input
// =============================================================================

/// Observation as submitted through the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationCreate {
    #[serde(rename = "phenomenonTime", alias = "phenomenon_time")]
    pub phenomenon_time: DateTime<Utc>,
    pub result: f64,
    #[serde(rename = "resultTime", alias = "result_time", default)]
    pub result_time: Option<DateTime<Utc>>,
    #[serde(rename = "resultQuality", alias = "result_quality", default)]
    pub result_quality: Option<Value>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub raw: Option<Value>,
    #[serde(default)]
    pub datastream_id: Option<String>,
    #[serde(default)]
    pub feature_of_interest_id: Option<String>,
}

impl ObservationCreate {
    fn into_new(self, datastream_id: String) -> NewObservation {
        NewObservation {
            datastream_id,
            phenomenon_time: self.phenomenon_time,
            result: self.result,
            result_time: self.result_time,
            result_quality: self.result_quality,
            parameters: self.parameters,
            raw: self.raw,
            feature_of_interest_id: self.feature_of_interest_id,
            received_at: Utc::now(),
        }
    }
}

// =============================================================================
// Catalog Snapshot
// =============================================================================

/// Serializable copy of every catalog table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub things: Vec<Thing>,
    pub locations: Vec<Location>,
    pub sensors: Vec<Sensor>,
    pub observed_properties: Vec<ObservedProperty>,
    pub features_of_interest: Vec<FeatureOfInterest>,
    pub datastreams: Vec<Datastream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub things: usize,
    pub locations: usize,
    pub sensors: usize,
    pub observed_properties: usize,
    pub features_of_interest: usize,
    pub datastreams: usize,
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Default)]
pub(crate) struct Tables {
    pub things: EntityTable<Thing>,
    pub locations: EntityTable<Location>,
    pub sensors: EntityTable<Sensor>,
    pub observed_properties: EntityTable<ObservedProperty>,
    pub features: EntityTable<FeatureOfInterest>,
    pub datastreams: EntityTable<Datastream>,
}

/// The entity catalog. Owns the observation store's datastream registry:
/// creating a datastream attaches it, deleting one detaches and purges.
pub struct Catalog {
    tables: RwLock<Tables>,
    store: Arc<TimeSeriesStore>,
}

impl Catalog {
    pub fn new(store: Arc<TimeSeriesStore>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, Tables> {
        self.tables.read()
    }

    // -------------------------------------------------------------------------
    // Things
    // -------------------------------------------------------------------------

    pub fn create_thing(&self, input: ThingCreate) -> Result<Thing> {
        require_text("name", &input.name)?;
        let id = assign_id::<Thing>(input.id)?;
        let location_ids = dedup(input.location_ids);

        let mut tables = self.tables.write();
        for loc in &location_ids {
            tables.locations.require(loc)?;
        }

        let thing = Thing {
            id,
            name: input.name,
            description: input.description,
            properties: input.properties,
            location_ids,
        };
        tables.things.insert(thing.clone())?;
        tracing::debug!(thing = %thing.id, "Created thing");
        Ok(thing)
    }

    pub fn get_thing(&self, id: &str) -> Result<Thing> {
        self.tables.read().things.get(id).cloned()
    }

    pub fn list_things(&self, page: PageRequest) -> Page<Thing> {
        self.tables.read().things.page(|_| true, page)
    }

    pub fn update_thing(&self, id: &str, patch: ThingPatch) -> Result<Thing> {
        if let Some(name) = &patch.name {
            require_text("name", name)?;
        }

        let mut tables = self.tables.write();
        let location_ids = patch.location_ids.map(dedup);
        if let Some(ids) = &location_ids {
            for loc in ids {
                tables.locations.require(loc)?;
            }
        }

        let thing = tables.things.get_mut(id)?;
        if let Some(name) = patch.name {
            thing.name = name;
        }
        if let Some(description) = patch.description {
            thing.description = Some(description);
        }
        if let Some(properties) = patch.properties {
            thing.properties = properties;
        }
        if let Some(ids) = location_ids {
            thing.location_ids = ids;
        }
        Ok(thing.clone())
    }

    pub fn delete_thing(&self, id: &str) -> Result<Thing> {
        let mut tables = self.tables.write();
        tables.things.require(id)?;

        let referencing = tables.datastreams.ids_where(|d| d.thing_id == id);
        if !referencing.is_empty() {
            return Err(VigilError::conflict(format!(
                "Thing {} is referenced by datastreams: {}",
                id,
                referencing.join(", ")
            )));
        }
        tables.things.remove(id)
    }

    // -------------------------------------------------------------------------
    // Locations
    // -------------------------------------------------------------------------

    pub fn create_location(&self, input: LocationCreate) -> Result<Location> {
        require_text("name", &input.name)?;
        validate_geometry(&input.location)?;
        let id = assign_id::<Location>(input.id)?;
        let thing_ids = dedup(input.thing_ids);

        let mut tables = self.tables.write();
        for thing in &thing_ids {
            tables.things.require(thing)?;
        }

        let location = Location {
            id,
            name: input.name,
            description: input.description,
            encoding_type: input.encoding_type,
            location: input.location,
        };
        tables.locations.insert(location.clone())?;

        for thing_id in &thing_ids {
            let thing = tables.things.get_mut(thing_id)?;
            if !thing.location_ids.contains(&location.id) {
                thing.location_ids.push(location.id.clone());
            }
        }
        Ok(location)
    }

    pub fn get_location(&self, id: &str) -> Result<Location> {
        self.tables.read().locations.get(id).cloned()
    }

    pub fn list_locations(&self, page: PageRequest) -> Page<Location> {
        self.tables.read().locations.page(|_| true, page)
    }

    pub fn update_location(&self, id: &str, patch: LocationPatch) -> Result<Location> {
        if let Some(name) = &patch.name {
            require_text("name", name)?;
        }
        if let Some(geometry) = &patch.location {
            validate_geometry(geometry)?;
        }

        let mut tables = self.tables.write();
        let location = tables.locations.get_mut(id)?;
        if let Some(name) = patch.name {
            location.name = name;
        }
        if let Some(description) = patch.description {
            location.description = Some(description);
        }
        if let Some(encoding) = patch.encoding_type {
            location.encoding_type = encoding;
        }
        if let Some(geometry) = patch.location {
            location.location = geometry;
        }
        Ok(location.clone())
    }

    /// Remove a location and unlink it from every thing.
    pub fn delete_location(&self, id: &str) -> Result<Location> {
        let mut tables = self.tables.write();
        let location = tables.locations.remove(id)?;
        for thing in tables.things.values_mut() {
            thing.location_ids.retain(|l| l != id);
        }
        Ok(location)
    }

    // -------------------------------------------------------------------------
    // Sensors
    // -------------------------------------------------------------------------

    pub fn create_sensor(&self, input: SensorCreate) -> Result<Sensor> {
        require_text("name", &input.name)?;
        let sensor = Sensor {
            id: assign_id::<Sensor>(input.id)?,
            name: input.name,
            description: input.description,
            encoding_type: input.encoding_type,
            metadata: input.metadata,
        };
        self.tables.write().sensors.insert(sensor.clone())?;
        Ok(sensor)
    }

    pub fn get_sensor(&self, id: &str) -> Result<Sensor> {
        self.tables.read().sensors.get(id).cloned()
    }

    pub fn list_sensors(&self, page: PageRequest) -> Page<Sensor> {
        self.tables.read().sensors.page(|_| true, page)
    }

    pub fn update_sensor(&self, id: &str, patch: SensorPatch) -> Result<Sensor> {
        if let Some(name) = &patch.name {
            require_text("name", name)?;
        }

        let mut tables = self.tables.write();
        let sensor = tables.sensors.get_mut(id)?;
        if let Some(name) = patch.name {
            sensor.name = name;
        }
        if let Some(description) = patch.description {
            sensor.description = Some(description);
        }
        if let Some(encoding) = patch.encoding_type {
            sensor.encoding_type = encoding;
        }
        if let Some(metadata) = patch.metadata {
            sensor.metadata = Some(metadata);
        }
        Ok(sensor.clone())
    }

    pub fn delete_sensor(&self, id: &str) -> Result<Sensor> {
        let mut tables = self.tables.write();
        tables.sensors.require(id)?;

        let referencing = tables.datastreams.ids_where(|d| d.sensor_id == id);
        if !referencing.is_empty() {
            return Err(VigilError::conflict(format!(
                "Sensor {} is referenced by datastreams: {}",
                id,
                referencing.join(", ")
            )));
        }
        tables.sensors.remove(id)
    }

    // -------------------------------------------------------------------------
    // Observed Properties
    // -------------------------------------------------------------------------

    pub fn create_observed_property(&self, input: ObservedPropertyCreate) -> Result<ObservedProperty> {
        require_text("name", &input.name)?;
        require_text("definition", &input.definition)?;
        let property = ObservedProperty {
            id: assign_id::<ObservedProperty>(input.id)?,
            name: input.name,
            description: input.description,
            definition: input.definition,
        };
        self.tables.write().observed_properties.insert(property.clone())?;
        Ok(property)
    }

    pub fn get_observed_property(&self, id: &str) -> Result<ObservedProperty> {
        self.tables.read().observed_properties.get(id).cloned()
    }

    pub fn list_observed_properties(&self, page: PageRequest) -> Page<ObservedProperty> {
        self.tables.read().observed_properties.page(|_| true, page)
    }

    pub fn update_observed_property(&self, id: &str, patch: ObservedPropertyPatch) -> Result<ObservedProperty> {
        if let Some(name) = &patch.name {
            require_text("name", name)?;
        }
        if let Some(definition) = &patch.definition {
            require_text("definition", definition)?;
        }

        let mut tables = self.tables.write();
        let property = tables.observed_properties.get_mut(id)?;
        if let Some(name) = patch.name {
            property.name = name;
        }
        if let Some(description) = patch.description {
            property.description = Some(description);
        }
        if let Some(definition) = patch.definition {
            property.definition = definition;
        }
        Ok(property.clone())
    }

    pub fn delete_observed_property(&self, id: &str) -> Result<ObservedProperty> {
        let mut tables = self.tables.write();
        tables.observed_properties.require(id)?;

        let referencing = tables.datastreams.ids_where(|d| d.observed_property_id == id);
        if !referencing.is_empty() {
            return Err(VigilError::conflict(format!(
                "ObservedProperty {} is referenced by datastreams: {}",
                id,
                referencing.join(", ")
            )));
        }
        tables.observed_properties.remove(id)
    }

    // -------------------------------------------------------------------------
    // Features Of Interest
    // -------------------------------------------------------------------------

    pub fn create_feature(&self, input: FeatureOfInterestCreate) -> Result<FeatureOfInterest> {
        require_text("name", &input.name)?;
        validate_geometry(&input.feature)?;
        let feature = FeatureOfInterest {
            id: assign_id::<FeatureOfInterest>(input.id)?,
            name: input.name,
            description: input.description,
            encoding_type: input.encoding_type,
            feature: input.feature,
        };
        self.tables.write().features.insert(feature.clone())?;
        Ok(feature)
    }

    pub fn get_feature(&self, id: &str) -> Result<FeatureOfInterest> {
        self.tables.read().features.get(id).cloned()
    }

    pub fn list_features(&self, page: PageRequest) -> Page<FeatureOfInterest> {
        self.tables.read().features.page(|_| true, page)
    }

    pub fn update_feature(&self, id: &str, patch: FeatureOfInterestPatch) -> Result<FeatureOfInterest> {
        if let Some(name) = &patch.name {
            require_text("name", name)?;
        }
        if let Some(geometry) = &patch.feature {
            validate_geometry(geometry)?;
        }

        let mut tables = self.tables.write();
        let feature = tables.features.get_mut(id)?;
        if let Some(name) = patch.name {
            feature.name = name;
        }
        if let Some(description) = patch.description {
            feature.description = Some(description);
        }
        if let Some(encoding) = patch.encoding_type {
            feature.encoding_type = encoding;
        }
        if let Some(geometry) = patch.feature {
            feature.feature = geometry;
        }
        Ok(feature.clone())
    }

    pub fn delete_feature(&self, id: &str) -> Result<FeatureOfInterest> {
        let mut tables = self.tables.write();
        tables.features.require(id)?;

        let observations = self.store.count_for_feature(id);
        if observations > 0 {
            return Err(VigilError::conflict(format!(
                "FeatureOfInterest {} is referenced by {} observations",
                id, observations
            )));
        }
        tables.features.remove(id)
    }

    // -------------------------------------------------------------------------
    // Datastreams
    // -------------------------------------------------------------------------

    pub fn create_datastream(&self, input: DatastreamCreate) -> Result<Datastream> {
        let thing_id = required_ref("thing_id", input.thing_id)?;
        let sensor_id = required_ref("sensor_id", input.sensor_id)?;
        let property_id = required_ref("observed_property_id", input.observed_property_id)?;
        let id = assign_id::<Datastream>(input.id)?;

        let mut tables = self.tables.write();
        tables.things.require(&thing_id)?;
        tables.sensors.require(&sensor_id)?;
        tables.observed_properties.require(&property_id)?;

        let datastream = Datastream {
            id,
            name: input.name,
            description: input.description,
            unit_of_measurement: input.unit_of_measurement,
            observation_type: input.observation_type,
            thing_id,
            sensor_id,
            observed_property_id: property_id,
        };
        tables.datastreams.insert(datastream.clone())?;
        self.store.attach_datastream(&datastream.id);

        tracing::info!(
            datastream = %datastream.id,
            thing = %datastream.thing_id,
            observed_property = %datastream.observed_property_id,
            "Created datastream"
        );
        Ok(datastream)
    }

    pub fn get_datastream(&self, id: &str) -> Result<Datastream> {
        self.tables.read().datastreams.get(id).cloned()
    }

    pub fn list_datastreams(&self, page: PageRequest) -> Page<Datastream> {
        self.tables.read().datastreams.page(|_| true, page)
    }

    /// Patch a datastream. Its references may only move while it has no
    /// observations.
    pub fn update_datastream(&self, id: &str, patch: DatastreamPatch) -> Result<Datastream> {
        let mut tables = self.tables.write();
        tables.datastreams.require(id)?;

        if patch.changes_references() {
            let observations = self.store.count_for_datastream(id);
            if observations > 0 {
                return Err(VigilError::conflict(format!(
                    "Datastream {} has {} observations; its references are immutable",
                    id, observations
                )));
            }
        }
        if let Some(thing) = &patch.thing_id {
            tables.things.require(thing)?;
        }
        if let Some(sensor) = &patch.sensor_id {
            tables.sensors.require(sensor)?;
        }
        if let Some(property) = &patch.observed_property_id {
            tables.observed_properties.require(property)?;
        }

        let datastream = tables.datastreams.get_mut(id)?;
        if let Some(name) = patch.name {
            datastream.name = Some(name);
        }
        if let Some(description) = patch.description {
            datastream.description = Some(description);
        }
        if let Some(unit) = patch.unit_of_measurement {
            datastream.unit_of_measurement = unit;
        }
        if let Some(observation_type) = patch.observation_type {
            datastream.observation_type = observation_type;
        }
        if let Some(thing) = patch.thing_id {
            datastream.thing_id = thing;
        }
        if let Some(sensor) = patch.sensor_id {
            datastream.sensor_id = sensor;
        }
        if let Some(property) = patch.observed_property_id {
            datastream.observed_property_id = property;
        }
        Ok(datastream.clone())
    }

    /// Delete a datastream and every observation it owns. Returns the
    /// number of purged observations.
    pub fn delete_datastream(&self, id: &str) -> Result<usize> {
        let mut tables = self.tables.write();
        tables.datastreams.require(id)?;
        // A failed purge leaves both the row and its observations in place.
        let purged = self.store.detach_datastream(id)?;
        tables.datastreams.remove(id)?;
        tracing::info!(datastream = id, purged, "Deleted datastream");
        Ok(purged)
    }

    /// Datastreams of a thing that observe a property.
    pub fn datastreams_matching(&self, thing_id: &str, observed_property_id: &str) -> Vec<String> {
        self.tables
            .read()
            .datastreams
            .ids_where(|d| d.thing_id == thing_id && d.observed_property_id == observed_property_id)
    }

    // -------------------------------------------------------------------------
    // Observations
    // -------------------------------------------------------------------------

    /// Insert an observation after checking its datastream and feature of
    /// interest exist.
    pub fn create_observation(&self, input: ObservationCreate) -> Result<Observation> {
        let datastream_id = required_ref("datastream_id", input.datastream_id.clone())?;

        let tables = self.tables.read();
        tables.datastreams.require(&datastream_id)?;
        if let Some(feature) = &input.feature_of_interest_id {
            tables.features.require(feature)?;
        }
        self.store.insert(input.into_new(datastream_id))
    }

    /// Insert an ingested reading into the datastream it was resolved to.
    /// The datastream must still answer to `address` when the row lands;
    /// otherwise the reading is a `ResolutionMiss` and nothing is written.
    pub fn insert_attributed(&self, address: &ReadingAddress, observation: NewObservation) -> Result<Observation> {
        let tables = self.tables.read();
        let attributed = tables
            .datastreams
            .get(&observation.datastream_id)
            .map_or(false, |ds| address.names(ds));
        if !attributed {
            return Err(VigilError::ResolutionMiss(format!(
                "datastream {} no longer matches {}",
                observation.datastream_id, address
            )));
        }
        self.store.insert(observation)
    }

    /// Insert a batch; each item succeeds or fails on its own.
    pub fn create_observations(&self, inputs: Vec<ObservationCreate>) -> Vec<Result<Observation>> {
        inputs
            .into_iter()
            .map(|input| self.create_observation(input))
            .collect()
    }

    pub fn get_observation(&self, id: ObservationId) -> Result<Observation> {
        self.store.get(id)
    }

    pub fn update_observation(&self, id: ObservationId, update: AnnotationUpdate) -> Result<Observation> {
        if update.is_empty() {
            return Err(VigilError::validation(
                "only resultQuality and parameters may be updated",
            ));
        }
        self.store.update_annotations(id, update)
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> CatalogSnapshot {
        let tables = self.tables.read();
        CatalogSnapshot {
            things: tables.things.values().cloned().collect(),
            locations: tables.locations.values().cloned().collect(),
            sensors: tables.sensors.values().cloned().collect(),
            observed_properties: tables.observed_properties.values().cloned().collect(),
            features_of_interest: tables.features.values().cloned().collect(),
            datastreams: tables.datastreams.values().cloned().collect(),
        }
    }

    /// Replace every table with the snapshot contents and register its
    /// datastreams with the store.
    pub fn restore(&self, snapshot: CatalogSnapshot) -> Result<()> {
        let things: BTreeSet<&str> = snapshot.things.iter().map(|t| t.id.as_str()).collect();
        let sensors: BTreeSet<&str> = snapshot.sensors.iter().map(|s| s.id.as_str()).collect();
        let properties: BTreeSet<&str> = snapshot
            .observed_properties
            .iter()
            .map(|p| p.id.as_str())
            .collect();

        for ds in &snapshot.datastreams {
            if !things.contains(ds.thing_id.as_str())
                || !sensors.contains(ds.sensor_id.as_str())
                || !properties.contains(ds.observed_property_id.as_str())
            {
                return Err(VigilError::validation(format!(
                    "snapshot datastream {} has a dangling reference",
                    ds.id
                )));
            }
        }

        let mut tables = self.tables.write();

        for ds in &snapshot.datastreams {
            self.store.attach_datastream(&ds.id);
        }
        tables.things.replace_all(snapshot.things);
        tables.locations.replace_all(snapshot.locations);
        tables.sensors.replace_all(snapshot.sensors);
        tables.observed_properties.replace_all(snapshot.observed_properties);
        tables.features.replace_all(snapshot.features_of_interest);
        tables.datastreams.replace_all(snapshot.datastreams);
        Ok(())
    }

    pub fn stats(&self) -> CatalogStats {
        let tables = self.tables.read();
        CatalogStats {
            things: tables.things.len(),
            locations: tables.locations.len(),
            sensors: tables.sensors.len(),
            observed_properties: tables.observed_properties.len(),
            features_of_interest: tables.features.len(),
            datastreams: tables.datastreams.len(),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VigilError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn required_ref(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(VigilError::validation(format!("{} is required", field))),
    }
}

fn assign_id<T: Entity>(requested: Option<String>) -> Result<String> {
    match requested {
        Some(id) if id.trim().is_empty() => Err(VigilError::validation("id must not be empty")),
        Some(id) => Ok(id),
        None => Ok(generate_id(T::ID_PREFIX)),
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DatastreamResolver;
    use serde_json::json;
    use vigil_common::StoreConfig;

    fn catalog() -> Catalog {
        let store = Arc::new(TimeSeriesStore::open(&StoreConfig::default()).expect("open"));
        Catalog::new(store)
    }

    fn seed(catalog: &Catalog) -> Datastream {
        catalog
            .create_thing(ThingCreate {
                id: Some("thing-17".into()),
                name: "Station".into(),
                ..Default::default()
            })
            .expect("thing");
        catalog
            .create_sensor(SensorCreate {
                id: Some("sensor-1".into()),
                name: "DHT22".into(),
                description: None,
                encoding_type: DEFAULT_SENSOR_ENCODING.into(),
                metadata: None,
            })
            .expect("sensor");
        catalog
            .create_observed_property(ObservedPropertyCreate {
                id: Some("temp-prop".into()),
                name: "Temperature".into(),
                description: None,
                definition: "http://example.org/temperature".into(),
            })
            .expect("property");
        catalog.create_datastream(datastream_input("ds-1")).expect("datastream")
    }

    fn datastream_input(id: &str) -> DatastreamCreate {
        DatastreamCreate {
            id: Some(id.into()),
            name: Some("Air temperature".into()),
            description: None,
            unit_of_measurement: UnitOfMeasurement {
                name: Some("Celsius".into()),
                symbol: Some("°C".into()),
                definition: None,
            },
            observation_type: DEFAULT_OBSERVATION_TYPE.into(),
            thing_id: Some("thing-17".into()),
            sensor_id: Some("sensor-1".into()),
            observed_property_id: Some("temp-prop".into()),
        }
    }

    fn observation(ds: &str, t: DateTime<Utc>) -> ObservationCreate {
        ObservationCreate {
            phenomenon_time: t,
            result: 21.5,
            result_time: None,
            result_quality: None,
            parameters: None,
            raw: None,
            datastream_id: Some(ds.into()),
            feature_of_interest_id: None,
        }
    }

    #[test]
    fn test_generated_id_when_absent() {
        let catalog = catalog();
        let thing = catalog
            .create_thing(ThingCreate {
                name: "Unnamed".into(),
                ..Default::default()
            })
            .expect("thing");
        assert!(thing.id.starts_with("thing-"));
        assert_eq!(catalog.get_thing(&thing.id).expect("get"), thing);
    }

    #[test]
    fn test_datastream_requires_existing_references() {
        let catalog = catalog();
        seed(&catalog);

        let mut input = datastream_input("ds-2");
        input.sensor_id = Some("missing".into());
        let err = catalog.create_datastream(input).expect_err("missing sensor");
        assert!(matches!(err, VigilError::NotFound { ref entity, .. } if entity == "Sensor"));

        let mut input = datastream_input("ds-2");
        input.thing_id = None;
        assert!(matches!(
            catalog.create_datastream(input),
            Err(VigilError::Validation(_))
        ));
        assert!(catalog.get_datastream("ds-2").is_err());
    }

    #[test]
    fn test_observation_reference_checked_before_write() {
        let catalog = catalog();
        seed(&catalog);

        let err = catalog
            .create_observation(observation("nope", Utc::now()))
            .expect_err("unknown datastream");
        assert!(matches!(err, VigilError::NotFound { .. }));

        let mut input = observation("ds-1", Utc::now());
        input.feature_of_interest_id = Some("foi-missing".into());
        assert!(catalog.create_observation(input).is_err());
        assert!(catalog.store().is_empty());

        let obs = catalog
            .create_observation(observation("ds-1", Utc::now()))
            .expect("insert");
        assert_eq!(catalog.get_observation(obs.id).expect("get").datastream_id, "ds-1");
    }

    #[test]
    fn test_thing_delete_blocked_by_datastream() {
        let catalog = catalog();
        seed(&catalog);

        assert!(catalog.delete_thing("thing-17").expect_err("referenced").is_conflict());
        assert!(catalog.delete_sensor("sensor-1").expect_err("referenced").is_conflict());
        assert!(catalog
            .delete_observed_property("temp-prop")
            .expect_err("referenced")
            .is_conflict());

        catalog.delete_datastream("ds-1").expect("delete datastream");
        catalog.delete_thing("thing-17").expect("now deletable");
    }

    #[test]
    fn test_datastream_delete_cascades() {
        let catalog = catalog();
        seed(&catalog);
        let base = Utc::now();
        for i in 0..3 {
            catalog
                .create_observation(observation("ds-1", base + chrono::Duration::seconds(i)))
                .expect("insert");
        }

        assert_eq!(catalog.delete_datastream("ds-1").expect("delete"), 3);
        assert!(catalog.store().is_empty());
        assert!(catalog
            .create_observation(observation("ds-1", base))
            .is_err());
    }

    #[test]
    fn test_feature_delete_blocked_by_observations() {
        let catalog = catalog();
        seed(&catalog);
        catalog
            .create_feature(FeatureOfInterestCreate {
                id: Some("foi-1".into()),
                name: "Field".into(),
                description: None,
                encoding_type: DEFAULT_FEATURE_ENCODING.into(),
                feature: json!({"type": "Point", "coordinates": [1.0, 2.0]}),
            })
            .expect("feature");

        let mut input = observation("ds-1", Utc::now());
        input.feature_of_interest_id = Some("foi-1".into());
        catalog.create_observation(input).expect("insert");

        assert!(catalog.delete_feature("foi-1").expect_err("referenced").is_conflict());
    }

    #[test]
    fn test_location_delete_unlinks_things() {
        let catalog = catalog();
        seed(&catalog);
        let location = catalog
            .create_location(LocationCreate {
                id: Some("loc-1".into()),
                name: "Roof".into(),
                description: None,
                encoding_type: DEFAULT_LOCATION_ENCODING.into(),
                location: json!({"type": "Point", "coordinates": [2.35, 48.85]}),
                thing_ids: vec!["thing-17".into()],
            })
            .expect("location");

        assert_eq!(catalog.get_thing("thing-17").expect("thing").location_ids, vec![location.id.clone()]);
        catalog.delete_location(&location.id).expect("delete");
        assert!(catalog.get_thing("thing-17").expect("thing").location_ids.is_empty());
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let catalog = catalog();
        let err = catalog
            .create_location(LocationCreate {
                id: None,
                name: "Bad".into(),
                description: None,
                encoding_type: DEFAULT_LOCATION_ENCODING.into(),
                location: json!({"type": "Point", "coordinates": "nope"}),
                thing_ids: Vec::new(),
            })
            .expect_err("invalid geometry");
        assert!(matches!(err, VigilError::Validation(_)));
        assert_eq!(catalog.stats().locations, 0);
    }

    #[test]
    fn test_reading_not_stored_after_datastream_moves() {
        let catalog = Arc::new(catalog());
        seed(&catalog);
        catalog
            .create_thing(ThingCreate {
                id: Some("thing-18".into()),
                name: "Rooftop".into(),
                ..Default::default()
            })
            .expect("thing");

        let address = ReadingAddress::thing_property("thing-17", "temp-prop");
        let resolved = DatastreamResolver::new(catalog.clone())
            .resolve(&address)
            .expect("resolves");
        catalog
            .update_datastream(
                &resolved,
                DatastreamPatch {
                    thing_id: Some("thing-18".into()),
                    ..Default::default()
                },
            )
            .expect("no observations yet");

        let err = catalog
            .insert_attributed(&address, NewObservation::new(resolved.clone(), Utc::now(), 21.5))
            .expect_err("thing-17 no longer owns ds-1");
        assert_eq!(err.kind(), "resolution_miss");
        assert_eq!(catalog.store().count_for_datastream("ds-1"), 0);

        let current = ReadingAddress::thing_property("thing-18", "temp-prop");
        catalog
            .insert_attributed(&current, NewObservation::new(resolved, Utc::now(), 21.5))
            .expect("current owner");
        assert_eq!(catalog.store().count_for_datastream("ds-1"), 1);
    }

    #[test]
    fn test_reading_not_stored_after_datastream_deleted() {
        let catalog = catalog();
        seed(&catalog);
        let address = ReadingAddress::Datastream("ds-1".into());
        catalog.delete_datastream("ds-1").expect("delete");

        let err = catalog
            .insert_attributed(&address, NewObservation::new("ds-1", Utc::now(), 1.0))
            .expect_err("gone");
        assert_eq!(err.kind(), "resolution_miss");
    }

    #[test]
    fn test_datastream_references_immutable_with_observations() {
        let catalog = catalog();
        seed(&catalog);
        catalog
            .create_sensor(SensorCreate {
                id: Some("sensor-2".into()),
                name: "BME280".into(),
                description: None,
                encoding_type: DEFAULT_SENSOR_ENCODING.into(),
                metadata: None,
            })
            .expect("sensor");

        let moved = catalog
            .update_datastream(
                "ds-1",
                DatastreamPatch {
                    sensor_id: Some("sensor-2".into()),
                    ..Default::default()
                },
            )
            .expect("no observations yet");
        assert_eq!(moved.sensor_id, "sensor-2");

        catalog
            .create_observation(observation("ds-1", Utc::now()))
            .expect("insert");
        let err = catalog
            .update_datastream(
                "ds-1",
                DatastreamPatch {
                    sensor_id: Some("sensor-1".into()),
                    ..Default::default()
                },
            )
            .expect_err("immutable");
        assert!(err.is_conflict());

        let renamed = catalog
            .update_datastream(
                "ds-1",
                DatastreamPatch {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .expect("non-reference fields stay mutable");
        assert_eq!(renamed.name.as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_observation_patch_limited_to_annotations() {
        let catalog = catalog();
        seed(&catalog);
        let obs = catalog
            .create_observation(observation("ds-1", Utc::now()))
            .expect("insert");

        assert!(catalog
            .update_observation(obs.id, AnnotationUpdate::default())
            .is_err());
        let updated = catalog
            .update_observation(
                obs.id,
                AnnotationUpdate {
                    result_quality: Some(json!({"flag": "ok"})),
                    parameters: None,
                },
            )
            .expect("update");
        assert_eq!(updated.result, obs.result);
        assert_eq!(updated.result_quality, Some(json!({"flag": "ok"})));
    }

    #[test]
    fn test_snapshot_restore() {
        let catalog = catalog();
        seed(&catalog);
        let snapshot = catalog.snapshot();

        let fresh = self::catalog();
        fresh.restore(snapshot.clone()).expect("restore");
        assert_eq!(fresh.snapshot(), snapshot);
        assert!(fresh.store().has_datastream("ds-1"));

        let mut broken = snapshot;
        broken.things.clear();
        assert!(self::catalog().restore(broken).is_err());
    }
}
