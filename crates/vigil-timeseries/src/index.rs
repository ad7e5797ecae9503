//! Vigil Time Series Index
//!
//! Secondary lookups over the observation table: id to row key, and per
//! datastream / feature of interest row counts used by referential checks.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::types::{Observation, RowKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use vigil_common::ObservationId;

// =============================================================================
// Observation Index
// =============================================================================

/// Index for observation identity and reference counts.
pub struct ObservationIndex {
    by_id: RwLock<HashMap<ObservationId, RowKey>>,
    by_datastream: RwLock<HashMap<String, usize>>,
    by_feature: RwLock<HashMap<String, usize>>,
}

impl ObservationIndex {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            by_datastream: RwLock::new(HashMap::new()),
            by_feature: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, observation: &Observation) {
        self.by_id.write().insert(observation.id, observation.key());

        *self
            .by_datastream
            .write()
            .entry(observation.datastream_id.clone())
            .or_default() += 1;

        if let Some(foi) = &observation.feature_of_interest_id {
            *self.by_feature.write().entry(foi.clone()).or_default() += 1;
        }
    }

    /// Forget a datastream and every row it owned.
    pub fn remove_datastream(&self, datastream_id: &str, removed: &[Observation]) {
        {
            let mut by_id = self.by_id.write();
            for row in removed {
                by_id.remove(&row.id);
            }
        }

        self.by_datastream.write().remove(datastream_id);

        let mut by_feature = self.by_feature.write();
        for foi in removed.iter().filter_map(|r| r.feature_of_interest_id.as_ref()) {
            if let Some(count) = by_feature.get_mut(foi) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    by_feature.remove(foi);
                }
            }
        }
    }

    pub fn locate(&self, id: ObservationId) -> Option<RowKey> {
        self.by_id.read().get(&id).cloned()
    }

    pub fn count_for_datastream(&self, datastream_id: &str) -> usize {
        self.by_datastream.read().get(datastream_id).copied().unwrap_or(0)
    }

    pub fn count_for_feature(&self, feature_id: &str) -> usize {
        self.by_feature.read().get(feature_id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.by_id.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObservationIndex {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
