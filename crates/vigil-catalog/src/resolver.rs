//! Vigil Datastream Resolver
//!
//! Maps the addressing key of an inbound reading to exactly one datastream.
//! Every call reads the catalog afresh; nothing is cached between messages,
//! so a datastream created after a miss resolves on the next reading.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::catalog::Catalog;
use crate::entities::Datastream;
use std::sync::Arc;
use vigil_common::VigilError;

// =============================================================================
// Reading Address
// =============================================================================

/// How a reading names its datastream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadingAddress {
    Datastream(String),
    ThingProperty {
        thing_id: String,
        observed_property_id: String,
    },
}

impl ReadingAddress {
    pub fn thing_property(thing_id: impl Into<String>, observed_property_id: impl Into<String>) -> Self {
        Self::ThingProperty {
            thing_id: thing_id.into(),
            observed_property_id: observed_property_id.into(),
        }
    }
}

impl ReadingAddress {
    /// True while `datastream` still answers to this address.
    pub fn names(&self, datastream: &Datastream) -> bool {
        match self {
            Self::Datastream(id) => datastream.id == *id,
            Self::ThingProperty {
                thing_id,
                observed_property_id,
            } => datastream.thing_id == *thing_id && datastream.observed_property_id == *observed_property_id,
        }
    }
}

impl std::fmt::Display for ReadingAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Datastream(id) => write!(f, "datastream {}", id),
            Self::ThingProperty {
                thing_id,
                observed_property_id,
            } => write!(f, "thing {} / property {}", thing_id, observed_property_id),
        }
    }
}

// =============================================================================
// Resolution Miss
// =============================================================================

/// Why a reading could not be attributed. Not fatal: the reading is dropped
/// and a later one with the same address may resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionMiss {
    NoMatch { address: ReadingAddress },
    Ambiguous {
        address: ReadingAddress,
        candidates: Vec<String>,
    },
}

impl ResolutionMiss {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoMatch { .. } => "no_match",
            Self::Ambiguous { .. } => "ambiguous",
        }
    }
}

impl std::fmt::Display for ResolutionMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatch { address } => write!(f, "no datastream for {}", address),
            Self::Ambiguous { address, candidates } => write!(
                f,
                "{} matches {} datastreams: {}",
                address,
                candidates.len(),
                candidates.join(", ")
            ),
        }
    }
}

impl std::error::Error for ResolutionMiss {}

impl From<ResolutionMiss> for VigilError {
    fn from(miss: ResolutionMiss) -> Self {
        VigilError::ResolutionMiss(miss.to_string())
    }
}

// =============================================================================
// Resolver
// =============================================================================

#[derive(Clone)]
pub struct DatastreamResolver {
    catalog: Arc<Catalog>,
}

impl DatastreamResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Resolve an address to a single datastream id.
    pub fn resolve(&self, address: &ReadingAddress) -> Result<String, ResolutionMiss> {
        match address {
            ReadingAddress::Datastream(id) => {
                if self.catalog.read().datastreams.contains(id) {
                    Ok(id.clone())
                } else {
                    Err(ResolutionMiss::NoMatch {
                        address: address.clone(),
                    })
                }
            }
            ReadingAddress::ThingProperty {
                thing_id,
                observed_property_id,
            } => {
                let mut candidates = self.catalog.datastreams_matching(thing_id, observed_property_id);
                match candidates.len() {
                    0 => Err(ResolutionMiss::NoMatch {
                        address: address.clone(),
                    }),
                    1 => Ok(candidates.remove(0)),
                    _ => Err(ResolutionMiss::Ambiguous {
                        address: address.clone(),
                        candidates,
                    }),
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
