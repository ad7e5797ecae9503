//! Vigil Common - Shared Types and Utilities
//!
//! Foundational types, error handling, and configuration used across the
//! Vigil sensor network service. Provides the abstractions that keep the
//! catalog, the time series store and the ingestion pipeline consistent.
//!
//! Key Features:
//! - Unified error taxonomy with retryable error detection
//! - Closed time ranges, sort order and pagination types
//! - Configuration structures for store, query and ingestion
//! - Stable hashing for datastream space partitioning
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{IngestConfig, QueryConfig, StoreConfig};
pub use error::{Result, VigilError};
pub use types::*;
pub use utils::format_size;
