//! Vigil Catalog - Sensor Network Entity Catalog
//!
//! Reference entities of the sensor network (things, locations, sensors,
//! observed properties, features of interest and datastreams) with their
//! relationships, plus the read paths built on top of them.
//!
//! Key Features:
//! - CRUD with foreign-key validation before every write
//! - Fixed deletion policies (reject, cascade or unlink)
//! - GeoJSON Point / Polygon validation
//! - Datastream resolution for inbound readings, re-checked at insert
//! - Paginated observation and relationship queries
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod catalog;
pub mod collection;
pub mod entities;
pub mod geometry;
pub mod query;
pub mod resolver;
pub mod sink;

pub use catalog::{Catalog, CatalogSnapshot, CatalogStats, ObservationCreate};
pub use collection::EntityTable;
pub use entities::*;
pub use geometry::{validate_geometry, GeometryError, GeometryKind};
pub use query::{ObservationQuery, QueryEngine};
pub use resolver::{DatastreamResolver, ReadingAddress, ResolutionMiss};
pub use sink::ReadingSink;
