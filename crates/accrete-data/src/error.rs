//! Error types for data operations.

use thiserror::Error;

/// Result type for data operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur during data operations.
#[derive(Debug, Error)]
pub enum DataError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data parsing error
    #[error("Data parsing error: {0}")]
    Parse(String),

    /// Missing required column in a frame
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Missing data
    #[error("Missing data for {entity_id}: {reason}")]
    MissingData {
        /// Entity that was queried
        entity_id: String,
        /// Reason for missing data
        reason: String,
    },

    /// Invalid date range
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        /// Start of the range
        start: String,
        /// End of the range
        end: String,
    },

    /// Frame rows are not grouped by entity or not ordered by time
    #[error("Frame is not grouped by entity and ordered by timestamp: {0}")]
    UnsortedFrame(String),
}
