//! Vigil Error - Unified Error Types
//!
//! Error taxonomy shared by the catalog, the time series store, the
//! ingestion pipeline and the HTTP layer. Separates caller mistakes
//! (missing references, duplicates, malformed input) from transient
//! storage faults so each path can decide whether to surface or retry.
//!
//! Key Features:
//! - NotFound / Conflict / Validation for request-path failures
//! - TransientStorage errors for bounded retry in the ingestion path
//! - ResolutionMiss for readings with no matching datastream
//! - Seamless integration with std::io::Error
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Vigil operations.
#[derive(Error, Debug)]
pub enum VigilError {
    // Reference errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // Uniqueness and policy conflicts
    #[error("conflict: {0}")]
    Conflict(String),

    // Input errors
    #[error("validation error: {0}")]
    Validation(String),

    // Storage errors
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    // Ingestion errors
    #[error("no datastream resolved: {0}")]
    ResolutionMiss(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;

// =============================================================================
// Constructors
// =============================================================================

impl VigilError {
    /// Missing entity of the given kind.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        VigilError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        VigilError::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        VigilError::Validation(msg.into())
    }
}

// =============================================================================
// Error Classification
// =============================================================================

impl VigilError {
    /// Returns true if the operation can be safely retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VigilError::TransientStorage(_))
    }

    /// Returns true if this is a caller error (vs system error).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            VigilError::NotFound { .. } | VigilError::Conflict(_) | VigilError::Validation(_)
        )
    }

    /// Returns true if this error reports a duplicate or policy conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, VigilError::Conflict(_))
    }

    /// Short, stable label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VigilError::NotFound { .. } => "not_found",
            VigilError::Conflict(_) => "conflict",
            VigilError::Validation(_) => "validation",
            VigilError::TransientStorage(_) => "transient_storage",
            VigilError::ResolutionMiss(_) => "resolution_miss",
            VigilError::Io(_) => "io",
            VigilError::Serialization(_) => "serialization",
            VigilError::Configuration(_) => "configuration",
            VigilError::Internal(_) => "internal",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
