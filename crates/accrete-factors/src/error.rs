//! Error types for factor computations.

use accrete_data::DataError;
use thiserror::Error;

/// Result type for factor operations.
pub type Result<T> = std::result::Result<T, FactorError>;

/// Errors that can occur during factor computation.
#[derive(Debug, Error)]
pub enum FactorError {
    /// Not enough rows to produce any output for an entity
    #[error("Insufficient data for {entity_id}: need {required} rows, got {available}")]
    InsufficientData {
        /// Entity being computed
        entity_id: String,
        /// Required number of rows
        required: usize,
        /// Available number of rows
        available: usize,
    },

    /// Persisted state failed a structural check
    #[error("Corrupted state for {entity_id}: {reason}")]
    StateCorruption {
        /// Entity whose state is corrupted
        entity_id: String,
        /// What is wrong with it
        reason: String,
    },

    /// Writing an entity's rows or state failed
    #[error("Persistence failed for {entity_id}: {source}")]
    Persistence {
        /// Entity being persisted
        entity_id: String,
        /// Underlying storage error
        source: DataError,
    },

    /// Invalid factor configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No entity resolved from the selection
    #[error("No data: {0}")]
    NoData(String),

    /// Missing required column in input data
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Factor not found in registry
    #[error("Factor not found: {0}")]
    NotFound(String),

    /// Storage or frame error
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Polars DataFrame error
    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// State serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FactorError {
    /// Whether the error only affects a single entity and the run can continue.
    pub const fn is_entity_scoped(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. } | Self::StateCorruption { .. } | Self::Persistence { .. }
        )
    }
}
