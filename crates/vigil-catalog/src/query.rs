//! Vigil Query Engine
//!
//! Filtered, time-ordered, paginated reads over observations plus the
//! relationship views of the catalog. Page sizes are capped here; the
//! total count always comes from the same predicate as the page.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::catalog::Catalog;
use crate::entities::{Datastream, Location, Thing};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_common::{Page, PageRequest, QueryConfig, Result, SortOrder, TimeRange, VigilError};
use vigil_timeseries::{Observation, ScanFilter, ScanRequest};

// =============================================================================
// Observation Query
// =============================================================================

/// Observation listing parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationQuery {
    pub datastream_id: Option<String>,
    pub feature_of_interest_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order: SortOrder,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl ObservationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn datastream(mut self, id: impl Into<String>) -> Self {
        self.datastream_id = Some(id.into());
        self
    }

    pub fn feature(mut self, id: impl Into<String>) -> Self {
        self.feature_of_interest_id = Some(id.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}

// =============================================================================
// Query Engine
// =============================================================================

#[derive(Clone)]
pub struct QueryEngine {
    catalog: Arc<Catalog>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(catalog: Arc<Catalog>, config: QueryConfig) -> Self {
        Self { catalog, config }
    }

    /// Resolve optional offset / limit into a capped page window.
    pub fn page_request(&self, offset: Option<usize>, limit: Option<usize>) -> PageRequest {
        PageRequest::new(
            offset.unwrap_or(0),
            limit.unwrap_or(self.config.default_page_size),
        )
        .capped(self.config.max_page_size)
    }

    // -------------------------------------------------------------------------
    // Observations
    // -------------------------------------------------------------------------

    pub fn observations(&self, query: &ObservationQuery) -> Result<Page<Observation>> {
        let range = query.range();
        if range.is_empty() {
            return Err(VigilError::validation("start must not be after end"));
        }

        let filter = ScanFilter {
            datastream_id: query.datastream_id.clone(),
            feature_of_interest_id: query.feature_of_interest_id.clone(),
            time_range: range,
        };
        let request = ScanRequest::new(filter)
            .order(query.order)
            .page(self.page_request(query.offset, query.limit));
        self.catalog.store().scan(&request)
    }

    /// Observations of one datastream; NotFound when it does not exist.
    pub fn observations_of_datastream(&self, datastream_id: &str, query: &ObservationQuery) -> Result<Page<Observation>> {
        self.catalog.get_datastream(datastream_id)?;
        let scoped = ObservationQuery {
            datastream_id: Some(datastream_id.to_string()),
            ..query.clone()
        };
        self.observations(&scoped)
    }

    pub fn observations_of_feature(&self, feature_id: &str, query: &ObservationQuery) -> Result<Page<Observation>> {
        self.catalog.get_feature(feature_id)?;
        let scoped = ObservationQuery {
            feature_of_interest_id: Some(feature_id.to_string()),
            ..query.clone()
        };
        self.observations(&scoped)
    }

    // -------------------------------------------------------------------------
    // Relationship Views
    // -------------------------------------------------------------------------

    pub fn datastreams_of_thing(&self, thing_id: &str, page: PageRequest) -> Result<Page<Datastream>> {
        let tables = self.catalog.read();
        tables.things.require(thing_id)?;
        Ok(tables
            .datastreams
            .page(|d| d.thing_id == thing_id, page.capped(self.config.max_page_size)))
    }

    pub fn datastreams_of_sensor(&self, sensor_id: &str, page: PageRequest) -> Result<Page<Datastream>> {
        let tables = self.catalog.read();
        tables.sensors.require(sensor_id)?;
        Ok(tables
            .datastreams
            .page(|d| d.sensor_id == sensor_id, page.capped(self.config.max_page_size)))
    }

    pub fn datastreams_of_observed_property(&self, property_id: &str, page: PageRequest) -> Result<Page<Datastream>> {
        let tables = self.catalog.read();
        tables.observed_properties.require(property_id)?;
        Ok(tables.datastreams.page(
            |d| d.observed_property_id == property_id,
            page.capped(self.config.max_page_size),
        ))
    }

    pub fn locations_of_thing(&self, thing_id: &str, page: PageRequest) -> Result<Page<Location>> {
        let tables = self.catalog.read();
        let thing = tables.things.get(thing_id)?;
        Ok(tables.locations.page(
            |l| thing.location_ids.contains(&l.id),
            page.capped(self.config.max_page_size),
        ))
    }

    pub fn things_of_location(&self, location_id: &str, page: PageRequest) -> Result<Page<Thing>> {
        let tables = self.catalog.read();
        tables.locations.require(location_id)?;
        Ok(tables.things.page(
            |t| t.location_ids.iter().any(|l| l == location_id),
            page.capped(self.config.max_page_size),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
