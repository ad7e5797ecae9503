//! Vigil Reading Sink
//!
//! Async write seam used by the ingestion pipeline. A reading is written
//! together with the address it was resolved from, so the catalog can
//! refuse it if the datastream changed owner in between.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::catalog::Catalog;
use crate::resolver::ReadingAddress;
use async_trait::async_trait;
use std::sync::Arc;
use vigil_common::Result;
use vigil_timeseries::{NewObservation, Observation};

// =============================================================================
// Reading Sink
// =============================================================================

/// Destination for ingested readings.
///
/// Implementations report duplicates as `Conflict`, stale attribution as
/// `ResolutionMiss` and recoverable failures as `TransientStorage`; callers
/// retry only the latter.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn write(&self, address: &ReadingAddress, observation: NewObservation) -> Result<Observation>;
}

#[async_trait]
impl ReadingSink for Catalog {
    async fn write(&self, address: &ReadingAddress, observation: NewObservation) -> Result<Observation> {
        self.insert_attributed(address, observation)
    }
}

#[async_trait]
impl<T: ReadingSink + ?Sized> ReadingSink for Arc<T> {
    async fn write(&self, address: &ReadingAddress, observation: NewObservation) -> Result<Observation> {
        (**self).write(address, observation).await
    }
}
