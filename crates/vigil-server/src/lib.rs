//! Vigil Server - Sensor API
//!
//! HTTP server for the Vigil sensor network. Exposes the entity catalog and
//! the observation store through SensorThings-style `/v1.0` routes and
//! feeds published readings to the ingestion pipeline.
//!
//! Key Features:
//! - CRUD for Things, Locations, Sensors, ObservedProperties,
//!   FeaturesOfInterest and Datastreams
//! - Filtered, paginated observation reads and batch writes
//! - Reading publication onto the in-process broker
//! - JSON snapshot persistence with periodic and shutdown saves
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod snapshot;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use router::create_router;
pub use snapshot::{Snapshot, SnapshotFile};
pub use state::AppState;
