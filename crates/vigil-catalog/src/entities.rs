//! Vigil Catalog Entities
//!
//! Reference entities of the sensor network and their create / patch
//! inputs. JSON field names follow SensorThings conventions; snake_case
//! aliases are accepted on input.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const DEFAULT_LOCATION_ENCODING: &str = "application/geo+json";
pub const DEFAULT_SENSOR_ENCODING: &str = "application/json";
pub const DEFAULT_FEATURE_ENCODING: &str = "application/geo+json";
pub const DEFAULT_OBSERVATION_TYPE: &str =
    "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement";

fn default_location_encoding() -> String {
    DEFAULT_LOCATION_ENCODING.to_string()
}

fn default_sensor_encoding() -> String {
    DEFAULT_SENSOR_ENCODING.to_string()
}

fn default_feature_encoding() -> String {
    DEFAULT_FEATURE_ENCODING.to_string()
}

fn default_observation_type() -> String {
    DEFAULT_OBSERVATION_TYPE.to_string()
}

// =============================================================================
// Entity Trait
// =============================================================================

/// Common shape of catalog entities.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Entity set name, used in error messages and routes.
    const KIND: &'static str;
    /// Prefix of generated ids.
    const ID_PREFIX: &'static str;

    fn id(&self) -> &str;
}

/// Generate an id of the form `<prefix>-<uuid hex>`.
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

macro_rules! impl_entity {
    ($ty:ty, $kind:literal, $prefix:literal) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;
            const ID_PREFIX: &'static str = $prefix;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

// =============================================================================
// Thing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub location_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingCreate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, alias = "Locations")]
    pub location_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub properties: Option<Map<String, Value>>,
    pub location_ids: Option<Vec<String>>,
}

impl_entity!(Thing, "Thing", "thing");

// =============================================================================
// Location
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default = "default_location_encoding")]
    pub encoding_type: String,
    /// GeoJSON Point, Polygon or Feature.
    pub location: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCreate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default = "default_location_encoding")]
    pub encoding_type: String,
    pub location: Value,
    /// Things to link to the new location.
    #[serde(default)]
    pub thing_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default)]
    pub encoding_type: Option<String>,
    pub location: Option<Value>,
}

impl_entity!(Location, "Location", "loc");

// =============================================================================
// Sensor
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default = "default_sensor_encoding")]
    pub encoding_type: String,
    /// Opaque metadata, typically a datasheet URL.
    #[serde(default, alias = "metadata_")]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCreate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default = "default_sensor_encoding")]
    pub encoding_type: String,
    #[serde(default, alias = "metadata_")]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default)]
    pub encoding_type: Option<String>,
    #[serde(default, alias = "metadata_")]
    pub metadata: Option<String>,
}

impl_entity!(Sensor, "Sensor", "sensor");

// =============================================================================
// Observed Property
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedProperty {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Definition URI.
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedPropertyCreate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub definition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedPropertyPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub definition: Option<String>,
}

impl_entity!(ObservedProperty, "ObservedProperty", "prop");

// =============================================================================
// Feature Of Interest
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOfInterest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default = "default_feature_encoding")]
    pub encoding_type: String,
    pub feature: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOfInterestCreate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default = "default_feature_encoding")]
    pub encoding_type: String,
    pub feature: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureOfInterestPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "encodingType", alias = "encoding_type", default)]
    pub encoding_type: Option<String>,
    pub feature: Option<Value>,
}

impl_entity!(FeatureOfInterest, "FeatureOfInterest", "foi");

// =============================================================================
// Datastream
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfMeasurement {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datastream {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "unitOfMeasurement", alias = "unit_of_measurement")]
    pub unit_of_measurement: UnitOfMeasurement,
    #[serde(rename = "observationType", alias = "observation_type", default = "default_observation_type")]
    pub observation_type: String,
    pub thing_id: String,
    pub sensor_id: String,
    pub observed_property_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastreamCreate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "unitOfMeasurement", alias = "unit_of_measurement")]
    pub unit_of_measurement: UnitOfMeasurement,
    #[serde(rename = "observationType", alias = "observation_type", default = "default_observation_type")]
    pub observation_type: String,
    #[serde(default)]
    pub thing_id: Option<String>,
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub observed_property_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatastreamPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "unitOfMeasurement", alias = "unit_of_measurement", default)]
    pub unit_of_measurement: Option<UnitOfMeasurement>,
    #[serde(rename = "observationType", alias = "observation_type", default)]
    pub observation_type: Option<String>,
    pub thing_id: Option<String>,
    pub sensor_id: Option<String>,
    pub observed_property_id: Option<String>,
}

impl DatastreamPatch {
    pub fn changes_references(&self) -> bool {
        self.thing_id.is_some() || self.sensor_id.is_some() || self.observed_property_id.is_some()
    }
}

impl_entity!(Datastream, "Datastream", "ds");

// =============================================================================
// Tests
// =============================================================================
