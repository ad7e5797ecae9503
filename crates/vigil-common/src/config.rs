//! Vigil Config - Configuration Structures
//!
//! Configuration types for the store, the query path and the ingestion
//! pipeline. Every section has production defaults and deserializes from
//! the server's TOML file with missing keys falling back to those defaults.
//!
//! Key Features:
//! - Hypertable layout (chunk width, space partitions)
//! - Compression policy age and background job cadence
//! - Page size caps for list queries
//! - Ingestion topic namespace, retry and reconnect backoff
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for the observation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Width of a time chunk.
    pub chunk_interval_secs: u64,
    /// Number of datastream hash partitions per time chunk.
    pub space_partitions: u32,
    /// Chunks whose range ended longer ago than this are compressed.
    pub compress_after_days: u32,
    /// How often the background compression job runs.
    pub compression_job_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_interval_secs: 24 * 60 * 60,
            space_partitions: 4,
            compress_after_days: 365,
            compression_job_interval_secs: 60 * 60,
        }
    }
}

impl StoreConfig {
    pub fn chunk_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.chunk_interval_secs as i64)
    }

    pub fn compress_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.compress_after_days as i64)
    }

    pub fn compression_job_interval(&self) -> Duration {
        Duration::from_secs(self.compression_job_interval_secs)
    }
}

// =============================================================================
// Query Configuration
// =============================================================================

/// Configuration for list and scan queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 100,
        }
    }
}

// =============================================================================
// Ingestion Configuration
// =============================================================================

/// Configuration for the message ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,
    /// First topic segment, e.g. `iot` in `iot/<thing>/<property>`.
    pub topic_namespace: String,
    pub broker_buffer_size: usize,
    /// Attempts per reading before a transient failure drops it.
    pub max_insert_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic_namespace: "iot".to_string(),
            broker_buffer_size: 1024,
            max_insert_attempts: 5,
            retry_base_ms: 100,
            retry_max_ms: 5_000,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl IngestConfig {
    /// Topic filter matching every `<namespace>/<thing>/<property>` address.
    pub fn subscription(&self) -> String {
        format!("{}/+/+", self.topic_namespace)
    }
}

// =============================================================================
// Tests
// =============================================================================
