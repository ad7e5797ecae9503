//! Vigil Time Series Store
//!
//! Observation storage over the hypertable. Coordinates the datastream
//! registry (foreign key target), id allocation, uniqueness on
//! `(datastream, phenomenon time)`, scans, schema steps and compression.
//!
//! Lock order: datastream registry, hypertable layout, chunk map, chunk,
//! then the secondary index.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::index::ObservationIndex;
use crate::migration::{AppliedMigration, MigrationStep, Migrator, SchemaState, DATASTREAM_TIME_INDEX};
use crate::partition::{Dimensions, Hypertable, PartitionStats};
use crate::policy::CompressionReport;
use crate::query::{paginate, ScanRequest};
use crate::types::{NewObservation, Observation};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use vigil_common::{ObservationId, Page, Result, StoreConfig, VigilError};

// =============================================================================
// Annotation Update
// =============================================================================

/// Correction to the mutable annotations of a stored observation. The
/// measured value and its timestamps cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationUpdate {
    #[serde(rename = "resultQuality", default)]
    pub result_quality: Option<Value>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl AnnotationUpdate {
    pub fn is_empty(&self) -> bool {
        self.result_quality.is_none() && self.parameters.is_none()
    }
}

// =============================================================================
// Time Series Store
// =============================================================================

/// The observation store.
pub struct TimeSeriesStore {
    table: Hypertable,
    index: ObservationIndex,
    schema: RwLock<SchemaState>,
    migrations: Mutex<()>,
    datastreams: RwLock<HashSet<String>>,
    next_id: AtomicU64,
    stats: RwLock<StoreCounters>,
}

impl TimeSeriesStore {
    /// An empty, unconverted store.
    pub fn new() -> Self {
        Self {
            table: Hypertable::new(),
            index: ObservationIndex::new(),
            schema: RwLock::new(SchemaState::default()),
            migrations: Mutex::new(()),
            datastreams: RwLock::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            stats: RwLock::new(StoreCounters::default()),
        }
    }

    /// A store with the observation schema migrations applied.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store = Self::new();
        Migrator::observations(config).run(&store)?;
        Ok(store)
    }

    // -------------------------------------------------------------------------
    // Datastream Registry
    // -------------------------------------------------------------------------

    /// Register a datastream as a valid insert target.
    pub fn attach_datastream(&self, datastream_id: &str) -> bool {
        self.datastreams.write().insert(datastream_id.to_string())
    }

    /// Unregister a datastream and purge every observation it owns.
    pub fn detach_datastream(&self, datastream_id: &str) -> Result<usize> {
        let mut registry = self.datastreams.write();
        if !registry.contains(datastream_id) {
            return Ok(0);
        }

        let removed = self.table.remove_datastream(datastream_id)?;
        self.index.remove_datastream(datastream_id, &removed);
        registry.remove(datastream_id);
        drop(registry);

        if !removed.is_empty() {
            tracing::info!(datastream = datastream_id, rows = removed.len(), "Purged observations");
        }
        Ok(removed.len())
    }

    pub fn has_datastream(&self, datastream_id: &str) -> bool {
        self.datastreams.read().contains(datastream_id)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Insert one observation. Fails with `NotFound` for an unregistered
    /// datastream and `Conflict` when `(datastream, phenomenon time)` is
    /// already taken.
    pub fn insert(&self, new: NewObservation) -> Result<Observation> {
        validate(&new)?;

        let registry = self.datastreams.read();
        if !registry.contains(&new.datastream_id) {
            return Err(VigilError::not_found("Datastream", new.datastream_id));
        }

        let id = ObservationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let observation = new.into_observation(id);

        if let Err(e) = self.table.insert(observation.clone()) {
            if e.is_conflict() {
                self.stats.write().conflicts += 1;
            }
            return Err(e);
        }
        self.index.insert(&observation);
        drop(registry);

        self.stats.write().inserted += 1;
        Ok(observation)
    }

    /// Insert a batch. Every row is attempted; results are positional.
    pub fn insert_batch(&self, batch: Vec<NewObservation>) -> Vec<Result<Observation>> {
        batch.into_iter().map(|new| self.insert(new)).collect()
    }

    pub fn update_annotations(&self, id: ObservationId, update: AnnotationUpdate) -> Result<Observation> {
        let key = self
            .index
            .locate(id)
            .ok_or_else(|| VigilError::not_found("Observation", id.to_string()))?;

        self.table
            .update(&key, |row| {
                if let Some(quality) = update.result_quality {
                    row.result_quality = Some(quality);
                }
                if let Some(parameters) = update.parameters {
                    row.parameters = Some(parameters);
                }
            })?
            .ok_or_else(|| VigilError::not_found("Observation", id.to_string()))
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get(&self, id: ObservationId) -> Result<Observation> {
        let key = self
            .index
            .locate(id)
            .ok_or_else(|| VigilError::not_found("Observation", id.to_string()))?;
        self.table
            .get(&key)?
            .ok_or_else(|| VigilError::not_found("Observation", id.to_string()))
    }

    /// Filtered, ordered, paginated scan. The count covers the whole
    /// filtered set, not just the page.
    pub fn scan(&self, request: &ScanRequest) -> Result<Page<Observation>> {
        let indexed = self.schema.read().has_index(DATASTREAM_TIME_INDEX);
        let rows = self.table.scan(&request.filter, indexed)?;

        {
            let mut stats = self.stats.write();
            stats.scans += 1;
            stats.rows_scanned += rows.len() as u64;
        }

        Ok(paginate(rows, request.order, request.page))
    }

    pub fn count_for_datastream(&self, datastream_id: &str) -> usize {
        self.index.count_for_datastream(datastream_id)
    }

    pub fn count_for_feature(&self, feature_id: &str) -> usize {
        self.index.count_for_feature(feature_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // -------------------------------------------------------------------------
    // Compression
    // -------------------------------------------------------------------------

    /// Apply the compression policy as of `now`. Without a policy this is a
    /// no-op.
    pub fn compress_eligible(&self, now: DateTime<Utc>) -> Result<CompressionReport> {
        let policy = {
            let schema = self.schema.read();
            match (schema.compression, schema.compression_policy) {
                (Some(_), Some(policy)) => policy,
                _ => return Ok(CompressionReport::default()),
            }
        };

        let report = self.table.compress_before(now - policy.compress_after(), now)?;
        self.stats.write().last_compression = Some(now);
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Schema
    // -------------------------------------------------------------------------

    pub fn schema(&self) -> SchemaState {
        self.schema.read().clone()
    }

    pub fn dimensions(&self) -> Dimensions {
        self.table.dimensions()
    }

    pub(crate) fn migration_guard(&self) -> MutexGuard<'_, ()> {
        self.migrations.lock()
    }

    pub(crate) fn record_migration(&self, version: u32, name: &str) {
        self.schema.write().applied.insert(
            version,
            AppliedMigration {
                name: name.to_string(),
                applied_at: Utc::now(),
            },
        );
    }

    /// Apply one schema step. Returns `false` when its effect is already
    /// present.
    pub fn apply_step(&self, step: &MigrationStep) -> Result<bool> {
        match step {
            MigrationStep::ConvertToHypertable { chunk_interval_secs } => {
                if self.schema.read().time_dimension_secs.is_some() {
                    return Ok(false);
                }
                let current = self.table.dimensions();
                let moved = self.table.repartition(Dimensions {
                    chunk_interval_secs: Some(*chunk_interval_secs),
                    space_partitions: current.space_partitions,
                })?;
                self.schema.write().time_dimension_secs = Some(*chunk_interval_secs);
                tracing::debug!(rows = moved, "Converted observations to hypertable");
                Ok(true)
            }
            MigrationStep::AddSpaceDimension { partitions } => {
                if self.schema.read().space_partitions.is_some() {
                    return Ok(false);
                }
                let current = self.table.dimensions();
                if !current.is_hypertable() {
                    return Err(VigilError::validation(
                        "space dimension requires a hypertable",
                    ));
                }
                self.table.repartition(Dimensions {
                    chunk_interval_secs: current.chunk_interval_secs,
                    space_partitions: *partitions,
                })?;
                self.schema.write().space_partitions = Some(*partitions);
                Ok(true)
            }
            MigrationStep::CreateIndex(definition) => {
                let mut schema = self.schema.write();
                if schema.has_index(&definition.name) {
                    return Ok(false);
                }
                schema.indexes.push(definition.clone());
                Ok(true)
            }
            MigrationStep::EnableCompression(settings) => {
                if !self.table.dimensions().is_hypertable() {
                    return Err(VigilError::validation("compression requires a hypertable"));
                }
                let mut schema = self.schema.write();
                if schema.compression.is_some() {
                    return Ok(false);
                }
                schema.compression = Some(*settings);
                Ok(true)
            }
            MigrationStep::AddCompressionPolicy(policy) => {
                let mut schema = self.schema.write();
                if schema.compression.is_none() {
                    return Err(VigilError::validation(
                        "compression policy requires compression to be enabled",
                    ));
                }
                if schema.compression_policy.is_some() {
                    return Ok(false);
                }
                schema.compression_policy = Some(*policy);
                Ok(true)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn export_rows(&self) -> Result<Vec<Observation>> {
        let mut rows = self.table.export()?;
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    /// Load rows with their original ids. Datastreams must be attached
    /// first.
    pub fn restore_rows(&self, rows: Vec<Observation>) -> Result<usize> {
        let registry = self.datastreams.read();
        let mut restored = 0;

        for row in rows {
            if !registry.contains(&row.datastream_id) {
                return Err(VigilError::not_found("Datastream", row.datastream_id));
            }
            self.next_id.fetch_max(row.id.0 + 1, Ordering::SeqCst);
            self.table.insert(row.clone())?;
            self.index.insert(&row);
            restored += 1;
        }

        Ok(restored)
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub fn stats(&self) -> StoreStats {
        let counters = self.stats.read().clone();
        StoreStats {
            observations: self.index.len(),
            datastreams: self.datastreams.read().len(),
            dimensions: self.table.dimensions(),
            chunks: self.table.stats(),
            schema_version: self.schema.read().current_version(),
            inserted: counters.inserted,
            conflicts: counters.conflicts,
            scans: counters.scans,
            rows_scanned: counters.rows_scanned,
            last_compression: counters.last_compression,
        }
    }
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(new: &NewObservation) -> Result<()> {
    if new.datastream_id.trim().is_empty() {
        return Err(VigilError::validation("datastream id is required"));
    }
    if !new.result.is_finite() {
        return Err(VigilError::validation("result must be a finite number"));
    }
    Ok(())
}

// =============================================================================
// Store Statistics
// =============================================================================

#[derive(Debug, Clone, Default)]
struct StoreCounters {
    inserted: u64,
    conflicts: u64,
    scans: u64,
    rows_scanned: u64,
    last_compression: Option<DateTime<Utc>>,
}

/// Point-in-time view of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub observations: usize,
    pub datastreams: usize,
    pub dimensions: Dimensions,
    pub chunks: PartitionStats,
    pub schema_version: u32,
    pub inserted: u64,
    pub conflicts: u64,
    pub scans: u64,
    pub rows_scanned: u64,
    pub last_compression: Option<DateTime<Utc>>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ScanFilter, ScanRequest};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;
    use vigil_common::{PageRequest, SortOrder};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn store() -> TimeSeriesStore {
        let store = TimeSeriesStore::open(&StoreConfig::default()).expect("open");
        store.attach_datastream("ds-1");
        store.attach_datastream("ds-2");
        store
    }

    #[test]
    fn test_insert_and_get() {
        let store = store();
        let t = at("2026-02-01T10:00:00Z");
        let obs = store
            .insert(NewObservation::new("ds-1", t, 21.5).with_quality(json!("good")))
            .expect("insert");

        let fetched = store.get(obs.id).expect("get");
        assert_eq!(fetched, obs);
        assert_eq!(store.count_for_datastream("ds-1"), 1);
    }

    #[test]
    fn test_insert_requires_registered_datastream() {
        let store = store();
        let err = store
            .insert(NewObservation::new("missing", Utc::now(), 1.0))
            .expect_err("unknown datastream");
        assert!(matches!(err, VigilError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_insert_rejects_non_finite_result() {
        let store = store();
        let err = store
            .insert(NewObservation::new("ds-1", Utc::now(), f64::NAN))
            .expect_err("nan");
        assert!(matches!(err, VigilError::Validation(_)));
    }

    #[test]
    fn test_duplicate_rejected() {
        let store = store();
        let t = at("2026-02-01T10:00:00Z");
        store.insert(NewObservation::new("ds-1", t, 1.0)).expect("insert");

        let err = store.insert(NewObservation::new("ds-1", t, 2.0)).expect_err("duplicate");
        assert!(err.is_conflict());

        // Same instant on another datastream is fine.
        store.insert(NewObservation::new("ds-2", t, 3.0)).expect("other datastream");
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().conflicts, 1);
    }

    #[test]
    fn test_concurrent_duplicate_inserts_single_winner() {
        let store = Arc::new(store());
        let t = at("2026-02-01T10:00:00Z");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.insert(NewObservation::new("ds-1", t, i as f64)).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|ok| *ok)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(store.count_for_datastream("ds-1"), 1);
    }

    #[test]
    fn test_scan_closed_range_inclusive() {
        let store = store();
        let base = at("2026-02-01T00:00:00Z");
        for i in 0..10 {
            store
                .insert(NewObservation::new("ds-1", base + Duration::minutes(i), i as f64))
                .expect("insert");
        }

        let request = ScanRequest::new(
            ScanFilter::for_datastream("ds-1").between(base + Duration::minutes(2), base + Duration::minutes(5)),
        )
        .order(SortOrder::Asc);
        let page = store.scan(&request).expect("scan");

        assert_eq!(page.count, 4);
        let results: Vec<f64> = page.items.iter().map(|o| o.result).collect();
        assert_eq!(results, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_scan_count_consistent_with_pages() {
        let store = store();
        let base = at("2026-02-01T00:00:00Z");
        for i in 0..25 {
            store
                .insert(NewObservation::new("ds-1", base + Duration::hours(i), i as f64))
                .expect("insert");
        }

        let mut seen = Vec::new();
        for offset in (0..25).step_by(10) {
            let page = store
                .scan(&ScanRequest::new(ScanFilter::for_datastream("ds-1")).page(PageRequest::new(offset, 10)))
                .expect("scan");
            assert_eq!(page.count, 25);
            seen.extend(page.items.into_iter().map(|o| o.id));
        }
        assert_eq!(seen.len(), 25);
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn test_scan_spans_compressed_and_hot_chunks() {
        let store = store();
        let old = at("2020-06-01T00:00:00Z");
        let now = at("2026-06-01T00:00:00Z");
        for i in 0..5 {
            store
                .insert(NewObservation::new("ds-1", old + Duration::minutes(i), i as f64))
                .expect("insert");
        }
        store.insert(NewObservation::new("ds-1", now, 99.0)).expect("insert");

        let report = store.compress_eligible(now).expect("compress");
        assert_eq!(report.rows_compressed, 5);

        let page = store
            .scan(&ScanRequest::new(ScanFilter::for_datastream("ds-1")))
            .expect("scan");
        assert_eq!(page.count, 6);
        assert_eq!(page.items[0].result, 99.0);
    }

    #[test]
    fn test_compression_is_idempotent() {
        let store = store();
        let old = at("2020-06-01T00:00:00Z");
        let now = at("2026-06-01T00:00:00Z");
        store.insert(NewObservation::new("ds-1", old, 1.0)).expect("insert");

        let first = store.compress_eligible(now).expect("first");
        let second = store.compress_eligible(now).expect("second");
        assert_eq!(first.chunks_compressed, 1);
        assert_eq!(second.chunks_compressed, 0);
        assert_eq!(second.chunks_skipped, 1);
    }

    #[test]
    fn test_update_annotations_on_compressed_row() {
        let store = store();
        let old = at("2020-06-01T00:00:00Z");
        let obs = store
            .insert(NewObservation::new("ds-1", old, 1.0).with_parameters(json!({"unit": "C"})))
            .expect("insert");
        store.compress_eligible(at("2026-06-01T00:00:00Z")).expect("compress");

        let updated = store
            .update_annotations(
                obs.id,
                AnnotationUpdate {
                    result_quality: Some(json!({"flag": "corrected"})),
                    parameters: None,
                },
            )
            .expect("update");

        assert_eq!(updated.result, 1.0);
        assert_eq!(updated.parameters, Some(json!({"unit": "C"})));
        assert_eq!(store.get(obs.id).expect("get").result_quality, Some(json!({"flag": "corrected"})));
    }

    #[test]
    fn test_detach_purges_rows() {
        let store = store();
        let t = at("2026-02-01T00:00:00Z");
        let obs = store
            .insert(NewObservation::new("ds-1", t, 1.0).with_feature_of_interest("foi-1"))
            .expect("insert");
        store.insert(NewObservation::new("ds-2", t, 2.0)).expect("insert");

        assert_eq!(store.detach_datastream("ds-1").expect("detach"), 1);
        assert!(store.get(obs.id).is_err());
        assert_eq!(store.count_for_feature("foi-1"), 0);
        assert!(store.insert(NewObservation::new("ds-1", t, 1.0)).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_detach_keeps_datastream() {
        let store = store();
        let now = at("2026-02-01T00:00:00Z");
        store
            .insert(NewObservation::new("ds-1", now - Duration::days(800), 1.0))
            .expect("insert");
        assert_eq!(store.compress_eligible(now).expect("compress").chunks_compressed, 1);
        store.table.damage_segments("ds-1");

        assert!(store.detach_datastream("ds-1").is_err());
        assert!(store.has_datastream("ds-1"));
        assert_eq!(store.count_for_datastream("ds-1"), 1);
    }

    #[test]
    fn test_export_restore() {
        let store = store();
        let base = at("2026-02-01T00:00:00Z");
        for i in 0..3 {
            store
                .insert(NewObservation::new("ds-1", base + Duration::seconds(i), i as f64))
                .expect("insert");
        }
        let rows = store.export_rows().expect("export");

        let restored = TimeSeriesStore::open(&StoreConfig::default()).expect("open");
        restored.attach_datastream("ds-1");
        assert_eq!(restored.restore_rows(rows.clone()).expect("restore"), 3);
        assert_eq!(restored.export_rows().expect("export"), rows);

        let next = restored
            .insert(NewObservation::new("ds-1", base + Duration::days(1), 9.0))
            .expect("insert");
        assert!(next.id.0 > rows.iter().map(|r| r.id.0).max().unwrap_or(0));
    }
}
