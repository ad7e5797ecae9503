//! Vigil Time Series Query
//!
//! Scan filters over the observation hypertable. A scan selects rows by
//! datastream, feature of interest and a closed phenomenon-time range,
//! orders them by phenomenon time and slices one page. The total count and
//! the page are computed from the same collected set.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::types::Observation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_common::{Page, PageRequest, SortOrder, TimeRange};

// =============================================================================
// Scan Filter
// =============================================================================

/// Row predicate for a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub datastream_id: Option<String>,
    pub feature_of_interest_id: Option<String>,
    pub time_range: TimeRange,
}

impl ScanFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_datastream(datastream_id: impl Into<String>) -> Self {
        Self {
            datastream_id: Some(datastream_id.into()),
            ..Default::default()
        }
    }

    pub fn for_feature(feature_id: impl Into<String>) -> Self {
        Self {
            feature_of_interest_id: Some(feature_id.into()),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = TimeRange::new(start, end);
        self
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    pub fn matches(&self, obs: &Observation) -> bool {
        if let Some(ds) = &self.datastream_id {
            if &obs.datastream_id != ds {
                return false;
            }
        }
        if let Some(foi) = &self.feature_of_interest_id {
            if obs.feature_of_interest_id.as_ref() != Some(foi) {
                return false;
            }
        }
        self.time_range.contains(&obs.phenomenon_time)
    }
}

// =============================================================================
// Scan Request
// =============================================================================

/// A filtered, ordered, paginated scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub filter: ScanFilter,
    pub order: SortOrder,
    pub page: PageRequest,
}

impl ScanRequest {
    pub fn new(filter: ScanFilter) -> Self {
        Self {
            filter,
            order: SortOrder::Desc,
            page: PageRequest::default(),
        }
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

/// Order rows by phenomenon time, tie-broken by datastream and id so that
/// pages are stable across calls.
pub fn sort_observations(rows: &mut [Observation], order: SortOrder) {
    rows.sort_by(|a, b| {
        let ord = a
            .phenomenon_time
            .cmp(&b.phenomenon_time)
            .then_with(|| a.datastream_id.cmp(&b.datastream_id))
            .then_with(|| a.id.cmp(&b.id));
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// Sort and slice a collected result set.
pub fn paginate(mut rows: Vec<Observation>, order: SortOrder, page: PageRequest) -> Page<Observation> {
    sort_observations(&mut rows, order);
    Page::from_sorted(rows, page)
}

// =============================================================================
// Tests
// =============================================================================
