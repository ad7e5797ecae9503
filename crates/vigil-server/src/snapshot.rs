//! Vigil Snapshots
//!
//! JSON persistence of the catalog and every observation row. The file is
//! written next to itself and renamed into place so a crash mid-save leaves
//! the previous snapshot intact.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use vigil_catalog::{Catalog, CatalogSnapshot};
use vigil_common::{Result, VigilError};
use vigil_timeseries::Observation;

pub const SNAPSHOT_FILE: &str = "vigil_snapshot.json";
pub const SNAPSHOT_FORMAT: u32 = 1;

// =============================================================================
// Snapshot
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: u32,
    pub saved_at: DateTime<Utc>,
    pub catalog: CatalogSnapshot,
    pub observations: Vec<Observation>,
}

impl Snapshot {
    /// Capture the catalog and the store. Rows whose datastream was created
    /// after the catalog view was taken are left for the next snapshot.
    pub fn capture(catalog: &Catalog) -> Result<Self> {
        let entities = catalog.snapshot();
        let mut observations = catalog.store().export_rows()?;

        let datastreams: HashSet<&str> = entities.datastreams.iter().map(|d| d.id.as_str()).collect();
        observations.retain(|o| datastreams.contains(o.datastream_id.as_str()));

        Ok(Self {
            format: SNAPSHOT_FORMAT,
            saved_at: Utc::now(),
            catalog: entities,
            observations,
        })
    }

    /// Load into an empty catalog and its store. Returns the row count.
    pub fn restore_into(self, catalog: &Catalog) -> Result<usize> {
        if self.format != SNAPSHOT_FORMAT {
            return Err(VigilError::Serialization(format!(
                "unsupported snapshot format {}",
                self.format
            )));
        }
        catalog.restore(self.catalog)?;
        catalog.store().restore_rows(self.observations)
    }
}

// =============================================================================
// Snapshot File
// =============================================================================

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        let snapshot = serde_json::from_str(&data)
            .map_err(|e| VigilError::Serialization(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| VigilError::Serialization(e.to_string()))?;

        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vigil_catalog::{DatastreamCreate, ObservationCreate, ObservedPropertyCreate, SensorCreate, ThingCreate};
    use vigil_timeseries::TimeSeriesStore;

    fn seeded_catalog() -> Catalog {
        let catalog = Catalog::new(Arc::new(TimeSeriesStore::new()));
        catalog
            .create_thing(ThingCreate {
                id: Some("thing-17".into()),
                name: "Boiler room".into(),
                ..Default::default()
            })
            .unwrap();
        catalog
            .create_sensor(serde_json::from_value::<SensorCreate>(serde_json::json!({
                "id": "sensor-1", "name": "PT100"
            })).unwrap())
            .unwrap();
        catalog
            .create_observed_property(serde_json::from_value::<ObservedPropertyCreate>(serde_json::json!({
                "id": "temp-prop", "name": "Temperature", "definition": "http://example.org/temperature"
            })).unwrap())
            .unwrap();
        catalog
            .create_datastream(serde_json::from_value::<DatastreamCreate>(serde_json::json!({
                "id": "ds-temp",
                "unitOfMeasurement": {"name": "Celsius", "symbol": "C"},
                "thing_id": "thing-17", "sensor_id": "sensor-1", "observed_property_id": "temp-prop"
            })).unwrap())
            .unwrap();
        for (minute, value) in [(0, 20.5), (1, 20.75), (2, 21.0)] {
            catalog
                .create_observation(serde_json::from_value::<ObservationCreate>(serde_json::json!({
                    "phenomenonTime": format!("2024-03-01T10:0{}:00Z", minute),
                    "result": value,
                    "datastream_id": "ds-temp"
                })).unwrap())
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::in_dir(dir.path());
        assert!(file.load().unwrap().is_none());

        let source = seeded_catalog();
        let snapshot = Snapshot::capture(&source).unwrap();
        file.save(&snapshot).unwrap();
        assert!(!file.path().with_extension("json.tmp").exists());

        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let target = Catalog::new(Arc::new(TimeSeriesStore::new()));
        assert_eq!(loaded.restore_into(&target).unwrap(), 3);
        assert_eq!(target.snapshot(), source.snapshot());
        assert_eq!(target.store().count_for_datastream("ds-temp"), 3);
    }

    #[test]
    fn test_restored_store_keeps_id_sequence() {
        let source = seeded_catalog();
        let snapshot = Snapshot::capture(&source).unwrap();
        let max_id = snapshot.observations.iter().map(|o| o.id).max().unwrap();

        let target = Catalog::new(Arc::new(TimeSeriesStore::new()));
        snapshot.restore_into(&target).unwrap();

        let next = target
            .create_observation(serde_json::from_value::<ObservationCreate>(serde_json::json!({
                "phenomenonTime": "2024-03-01T10:05:00Z",
                "result": 22.0,
                "datastream_id": "ds-temp"
            })).unwrap())
            .unwrap();
        assert!(next.id > max_id);
    }

    #[test]
    fn test_corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "{not json").unwrap();
        let err = SnapshotFile::in_dir(dir.path()).load().unwrap_err();
        assert_eq!(err.kind(), "serialization");
    }
}
