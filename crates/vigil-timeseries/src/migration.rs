//! Vigil Time Series Migrations
//!
//! Versioned schema migrations for the observation table. Each step checks
//! whether its effect is already present before applying, and the migrator
//! keeps a ledger of applied versions, so running the full set repeatedly
//! is a no-op.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::policy::{CompressionPolicy, CompressionSettings};
use crate::store::TimeSeriesStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vigil_common::{Result, StoreConfig};

/// Name of the composite `(datastream_id, phenomenon_time DESC)` index.
pub const DATASTREAM_TIME_INDEX: &str = "idx_observations_datastream_time";

// =============================================================================
// Schema State
// =============================================================================

/// Secondary index declared on the observation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
}

impl IndexDefinition {
    pub fn datastream_time() -> Self {
        Self {
            name: DATASTREAM_TIME_INDEX.to_string(),
            columns: vec!["datastream_id".to_string(), "phenomenon_time DESC".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Current schema of the observation table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaState {
    pub applied: BTreeMap<u32, AppliedMigration>,
    pub time_dimension_secs: Option<u64>,
    pub space_partitions: Option<u32>,
    pub indexes: Vec<IndexDefinition>,
    pub compression: Option<CompressionSettings>,
    pub compression_policy: Option<CompressionPolicy>,
}

impl SchemaState {
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == name)
    }

    pub fn current_version(&self) -> u32 {
        self.applied.keys().next_back().copied().unwrap_or(0)
    }
}

// =============================================================================
// Migrations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MigrationStep {
    ConvertToHypertable { chunk_interval_secs: u64 },
    AddSpaceDimension { partitions: u32 },
    CreateIndex(IndexDefinition),
    EnableCompression(CompressionSettings),
    AddCompressionPolicy(CompressionPolicy),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub step: MigrationStep,
}

impl Migration {
    fn new(version: u32, name: &str, step: MigrationStep) -> Self {
        Self {
            version,
            name: name.to_string(),
            step,
        }
    }
}

/// Versions applied and skipped by one migrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub applied: Vec<u32>,
    pub skipped: Vec<u32>,
}

// =============================================================================
// Migrator
// =============================================================================

pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Migrator {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    /// The observation table schema: hypertable conversion, space
    /// partitioning, the composite index, then compression.
    pub fn observations(config: &StoreConfig) -> Self {
        Self::new(vec![
            Migration::new(
                1,
                "convert_observations_to_hypertable",
                MigrationStep::ConvertToHypertable {
                    chunk_interval_secs: config.chunk_interval_secs,
                },
            ),
            Migration::new(
                2,
                "add_datastream_space_dimension",
                MigrationStep::AddSpaceDimension {
                    partitions: config.space_partitions,
                },
            ),
            Migration::new(
                3,
                "create_datastream_time_index",
                MigrationStep::CreateIndex(IndexDefinition::datastream_time()),
            ),
            Migration::new(
                4,
                "enable_observation_compression",
                MigrationStep::EnableCompression(CompressionSettings::default()),
            ),
            Migration::new(
                5,
                "add_observation_compression_policy",
                MigrationStep::AddCompressionPolicy(CompressionPolicy::new(config.compress_after_days)),
            ),
        ])
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every pending migration in version order.
    pub fn run(&self, store: &TimeSeriesStore) -> Result<MigrationReport> {
        let _guard = store.migration_guard();
        let mut report = MigrationReport::default();

        for migration in &self.migrations {
            if store.schema().applied.contains_key(&migration.version) {
                report.skipped.push(migration.version);
                continue;
            }

            let changed = store.apply_step(&migration.step)?;
            store.record_migration(migration.version, &migration.name);

            if changed {
                tracing::info!(version = migration.version, name = %migration.name, "Applied migration");
                report.applied.push(migration.version);
            } else {
                tracing::debug!(version = migration.version, name = %migration.name, "Migration already in place");
                report.skipped.push(migration.version);
            }
        }

        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Dimensions;
    use crate::query::{ScanFilter, ScanRequest};
    use crate::types::NewObservation;
    use chrono::Duration;

    #[test]
    fn test_full_run_builds_schema() {
        let store = TimeSeriesStore::new();
        let report = Migrator::observations(&StoreConfig::default())
            .run(&store)
            .expect("migrate");

        assert_eq!(report.applied, vec![1, 2, 3, 4, 5]);
        let schema = store.schema();
        assert_eq!(schema.current_version(), 5);
        assert_eq!(schema.time_dimension_secs, Some(86_400));
        assert_eq!(schema.space_partitions, Some(4));
        assert!(schema.has_index(DATASTREAM_TIME_INDEX));
        assert_eq!(schema.compression, Some(CompressionSettings::default()));
        assert_eq!(schema.compression_policy, Some(CompressionPolicy::new(365)));
        assert_eq!(
            store.dimensions(),
            Dimensions {
                chunk_interval_secs: Some(86_400),
                space_partitions: 4
            }
        );
    }

    #[test]
    fn test_second_run_is_noop() {
        let store = TimeSeriesStore::new();
        let migrator = Migrator::observations(&StoreConfig::default());
        migrator.run(&store).expect("first run");
        let before = store.schema();

        let report = migrator.run(&store).expect("second run");
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.schema(), before);
    }

    #[test]
    fn test_steps_detect_existing_effects_without_ledger() {
        let store = TimeSeriesStore::new();
        let config = StoreConfig::default();
        Migrator::observations(&config).run(&store).expect("migrate");

        // A second migrator with a different version numbering still sees
        // every effect in place.
        let renumbered: Vec<Migration> = Migrator::observations(&config)
            .migrations()
            .iter()
            .cloned()
            .map(|mut m| {
                m.version += 100;
                m
            })
            .collect();
        let report = Migrator::new(renumbered).run(&store).expect("migrate again");
        assert!(report.applied.is_empty());
        assert_eq!(store.schema().indexes.len(), 1);
    }

    #[test]
    fn test_conversion_preserves_existing_rows() {
        let store = TimeSeriesStore::new();
        store.attach_datastream("ds-1");
        let base = Utc::now() - Duration::days(10);
        for i in 0..48 {
            store
                .insert(NewObservation::new("ds-1", base + Duration::hours(i), i as f64))
                .expect("insert");
        }

        Migrator::observations(&StoreConfig::default()).run(&store).expect("migrate");

        let page = store
            .scan(&ScanRequest::new(ScanFilter::for_datastream("ds-1")))
            .expect("scan");
        assert_eq!(page.count, 48);
        assert!(store.stats().chunks.chunk_count >= 2);
    }

    #[test]
    fn test_policy_requires_compression() {
        let store = TimeSeriesStore::new();
        let err = store
            .apply_step(&MigrationStep::AddCompressionPolicy(CompressionPolicy::new(30)))
            .expect_err("compression not enabled");
        assert!(err.is_user_error());
    }
}
