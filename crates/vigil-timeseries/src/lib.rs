//! Vigil Time Series - Observation Store
//!
//! Storage for sensor observations as a time/space partitioned hypertable.
//! Rows are unique per `(datastream, phenomenon time)`, scanned through a
//! composite `(datastream, phenomenon time DESC)` index, and compressed into
//! columnar per-datastream segments once their chunk ages past the policy.
//!
//! Key Features:
//! - Daily time chunks with hashed datastream space partitions
//! - Atomic uniqueness check on insert
//! - Closed-range scans with consistent count and page
//! - Gorilla-encoded compression with late-insert and annotation support
//! - Idempotent versioned schema migrations
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod compression;
pub mod index;
pub mod migration;
pub mod partition;
pub mod policy;
pub mod query;
pub mod store;
pub mod types;

pub use compression::CompressedSegment;
pub use index::ObservationIndex;
pub use migration::{MigrationReport, MigrationStep, Migrator, SchemaState};
pub use partition::{Dimensions, Hypertable, PartitionStats};
pub use policy::{CompressionJob, CompressionPolicy, CompressionReport, CompressionSettings};
pub use query::{ScanFilter, ScanRequest};
pub use store::{AnnotationUpdate, StoreStats, TimeSeriesStore};
pub use types::{NewObservation, Observation, RowKey};
