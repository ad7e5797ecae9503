//! Vigil Time Series Types
//!
//! Observation rows and the composite row key that orders them inside a
//! chunk.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use vigil_common::ObservationId;

// =============================================================================
// Observation
// =============================================================================

/// A stored measurement on a datastream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "@iot.id")]
    pub id: ObservationId,
    #[serde(rename = "phenomenonTime")]
    pub phenomenon_time: DateTime<Utc>,
    #[serde(rename = "resultTime")]
    pub result_time: DateTime<Utc>,
    pub result: f64,
    #[serde(rename = "resultQuality", default, skip_serializing_if = "Option::is_none")]
    pub result_quality: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    pub datastream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_of_interest_id: Option<String>,
    /// Ingestion clock at the moment the row was accepted.
    pub received_at: DateTime<Utc>,
}

impl Observation {
    pub fn key(&self) -> RowKey {
        RowKey::new(self.datastream_id.clone(), self.phenomenon_time)
    }

    /// Rough in-memory footprint used for compression statistics.
    pub fn estimated_size(&self) -> usize {
        let json_len = |v: &Option<Value>| {
            v.as_ref()
                .map(|v| serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0))
                .unwrap_or(0)
        };
        std::mem::size_of::<Observation>()
            + self.datastream_id.len()
            + self.feature_of_interest_id.as_ref().map_or(0, |f| f.len())
            + json_len(&self.result_quality)
            + json_len(&self.parameters)
            + json_len(&self.raw)
    }
}

// =============================================================================
// New Observation
// =============================================================================

/// An observation that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub datastream_id: String,
    pub phenomenon_time: DateTime<Utc>,
    pub result: f64,
    pub result_time: Option<DateTime<Utc>>,
    pub result_quality: Option<Value>,
    pub parameters: Option<Value>,
    pub raw: Option<Value>,
    pub feature_of_interest_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl NewObservation {
    pub fn new(datastream_id: impl Into<String>, phenomenon_time: DateTime<Utc>, result: f64) -> Self {
        Self {
            datastream_id: datastream_id.into(),
            phenomenon_time,
            result,
            result_time: None,
            result_quality: None,
            parameters: None,
            raw: None,
            feature_of_interest_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_result_time(mut self, result_time: DateTime<Utc>) -> Self {
        self.result_time = Some(result_time);
        self
    }

    pub fn with_quality(mut self, quality: Value) -> Self {
        self.result_quality = Some(quality);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_feature_of_interest(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_of_interest_id = Some(feature_id.into());
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// Materialize the row. Times are truncated to microseconds, the
    /// resolution of the compressed column format.
    pub fn into_observation(self, id: ObservationId) -> Observation {
        let received_at = self.received_at.trunc_subsecs(6);
        Observation {
            id,
            phenomenon_time: self.phenomenon_time.trunc_subsecs(6),
            result_time: self
                .result_time
                .map(|t| t.trunc_subsecs(6))
                .unwrap_or(received_at),
            result: self.result,
            result_quality: self.result_quality,
            parameters: self.parameters,
            raw: self.raw,
            datastream_id: self.datastream_id,
            feature_of_interest_id: self.feature_of_interest_id,
            received_at,
        }
    }
}

// =============================================================================
// Row Key
// =============================================================================

/// Composite key `(datastream id ASC, phenomenon time DESC)`.
///
/// Rows inside a chunk are kept in this order, so the most recent readings
/// of one datastream form a contiguous run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub datastream_id: String,
    pub phenomenon_time: DateTime<Utc>,
}

impl RowKey {
    pub fn new(datastream_id: impl Into<String>, phenomenon_time: DateTime<Utc>) -> Self {
        Self {
            datastream_id: datastream_id.into(),
            phenomenon_time: phenomenon_time.trunc_subsecs(6),
        }
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.datastream_id
            .cmp(&other.datastream_id)
            .then_with(|| other.phenomenon_time.cmp(&self.phenomenon_time))
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// =============================================================================
// Tests
// =============================================================================
