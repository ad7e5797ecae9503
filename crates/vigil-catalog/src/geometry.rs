//! Vigil Catalog Geometry
//!
//! Boundary validation for GeoJSON geometries carried by Locations and
//! Features of Interest. Accepts `Point`, `Polygon` and a `Feature`
//! wrapping either. Geometries are stored as received; no conversion.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde_json::Value;
use vigil_common::VigilError;

// =============================================================================
// Geometry Kind
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Polygon,
}

// =============================================================================
// Geometry Error
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    NotAnObject,
    MissingType,
    UnsupportedType(String),
    MissingCoordinates,
    InvalidPosition(String),
    RingTooShort(usize),
    RingNotClosed(usize),
    MissingGeometry,
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "geometry must be a JSON object"),
            Self::MissingType => write!(f, "geometry is missing \"type\""),
            Self::UnsupportedType(t) => write!(f, "unsupported geometry type: {}", t),
            Self::MissingCoordinates => write!(f, "geometry is missing \"coordinates\""),
            Self::InvalidPosition(msg) => write!(f, "invalid position: {}", msg),
            Self::RingTooShort(i) => write!(f, "polygon ring {} needs at least 4 positions", i),
            Self::RingNotClosed(i) => write!(f, "polygon ring {} is not closed", i),
            Self::MissingGeometry => write!(f, "feature is missing \"geometry\""),
        }
    }
}

impl std::error::Error for GeometryError {}

impl From<GeometryError> for VigilError {
    fn from(err: GeometryError) -> Self {
        VigilError::Validation(err.to_string())
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validate a GeoJSON value and report what it describes.
pub fn validate_geometry(value: &Value) -> Result<GeometryKind, GeometryError> {
    let object = value.as_object().ok_or(GeometryError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(GeometryError::MissingType)?;

    match kind {
        "Feature" => {
            let geometry = object.get("geometry").ok_or(GeometryError::MissingGeometry)?;
            if geometry.get("type").and_then(Value::as_str) == Some("Feature") {
                return Err(GeometryError::UnsupportedType("nested Feature".into()));
            }
            validate_geometry(geometry)
        }
        "Point" => {
            let coordinates = object.get("coordinates").ok_or(GeometryError::MissingCoordinates)?;
            validate_position(coordinates)?;
            Ok(GeometryKind::Point)
        }
        "Polygon" => {
            let rings = object
                .get("coordinates")
                .ok_or(GeometryError::MissingCoordinates)?
                .as_array()
                .ok_or_else(|| GeometryError::InvalidPosition("polygon coordinates must be an array of rings".into()))?;
            if rings.is_empty() {
                return Err(GeometryError::RingTooShort(0));
            }
            for (i, ring) in rings.iter().enumerate() {
                validate_ring(i, ring)?;
            }
            Ok(GeometryKind::Polygon)
        }
        other => Err(GeometryError::UnsupportedType(other.to_string())),
    }
}

fn validate_position(value: &Value) -> Result<Vec<f64>, GeometryError> {
    let items = value
        .as_array()
        .ok_or_else(|| GeometryError::InvalidPosition("position must be an array".into()))?;
    if !(2..=3).contains(&items.len()) {
        return Err(GeometryError::InvalidPosition(format!(
            "expected 2 or 3 numbers, got {}",
            items.len()
        )));
    }
    items
        .iter()
        .map(|n| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| GeometryError::InvalidPosition(format!("{} is not a number", n)))
        })
        .collect()
}

fn validate_ring(index: usize, ring: &Value) -> Result<(), GeometryError> {
    let positions = ring
        .as_array()
        .ok_or_else(|| GeometryError::InvalidPosition("ring must be an array".into()))?
        .iter()
        .map(validate_position)
        .collect::<Result<Vec<_>, _>>()?;

    if positions.len() < 4 {
        return Err(GeometryError::RingTooShort(index));
    }
    if positions.first() != positions.last() {
        return Err(GeometryError::RingNotClosed(index));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
