//! Factor configuration.

use crate::error::{FactorError, Result};
use accrete_data::{Column, EntitySelection};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Gap filling applied to the result frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    /// Carry the last known row forward
    #[default]
    Forward,
}

/// Configuration shared by every [`Factor`](crate::factor::Factor).
///
/// # Example
///
/// ```
/// use accrete_factors::factor::FactorConfig;
///
/// let config: FactorConfig =
///     serde_json::from_str(r#"{"entity_ids": ["stock_sz_000001"], "need_persist": true}"#)
///         .unwrap();
/// assert!(config.need_persist);
/// assert!(config.computing_window.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorConfig {
    /// Entity selection criteria
    #[serde(flatten)]
    pub selection: EntitySelection,
    /// First timestamp to read (default: unbounded)
    pub start_timestamp: Option<NaiveDateTime>,
    /// Last timestamp to read (default: unbounded)
    pub end_timestamp: Option<NaiveDateTime>,
    /// Extra raw columns to read besides the ones the pipeline needs
    pub columns: Vec<Column>,
    /// Rows read before the first unpersisted one when resuming (default: whole history)
    pub computing_window: Option<usize>,
    /// Load and persist results and state (default: false)
    pub need_persist: bool,
    /// Wipe persisted results and state before the first compute (default: false)
    pub clear_state: bool,
    /// Compute without writing anything (default: false)
    pub dry_run: bool,
    /// Fill calendar gaps in the result (default: none)
    pub fill_method: Option<FillMethod>,
    /// Maximum consecutive rows filled per gap (default: unbounded)
    pub effective_number: Option<usize>,
    /// Rows kept in memory per entity after each compute (default: all)
    pub keep_window: Option<usize>,
}

impl FactorConfig {
    /// Configuration over explicit entities.
    pub fn for_entities<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selection: EntitySelection::ids(ids),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FactorError::Configuration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Reject incompatible settings.
    pub fn validate(&self) -> Result<()> {
        if self.dry_run && self.need_persist {
            return Err(FactorError::Configuration(
                "dry_run and need_persist cannot both be set".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_timestamp, self.end_timestamp)
            && start > end
        {
            return Err(FactorError::Configuration(format!(
                "start_timestamp {} is after end_timestamp {}",
                start, end
            )));
        }
        if self.keep_window == Some(0) {
            return Err(FactorError::Configuration(
                "keep_window must keep at least one row".to_string(),
            ));
        }
        if self.effective_number.is_some() && self.fill_method.is_none() {
            return Err(FactorError::Configuration(
                "effective_number needs a fill_method".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrete_data::model::parse_timestamp;

    #[test]
    fn test_flat_json() {
        let config: FactorConfig = serde_json::from_str(
            r#"{
                "codes": ["000001"],
                "entity_type": "stock",
                "start_timestamp": "2024-01-01T00:00:00",
                "columns": ["volume"],
                "fill_method": "forward",
                "effective_number": 3
            }"#,
        )
        .unwrap();
        assert_eq!(config.selection.codes, vec!["000001".to_string()]);
        assert_eq!(config.selection.entity_type.as_deref(), Some("stock"));
        assert_eq!(config.start_timestamp, Some(parse_timestamp("2024-01-01").unwrap()));
        assert_eq!(config.columns, vec![Column::Volume]);
        assert_eq!(config.fill_method, Some(FillMethod::Forward));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_incompatible_flags() {
        let config = FactorConfig {
            dry_run: true,
            need_persist: true,
            ..FactorConfig::default()
        };
        assert!(matches!(config.validate(), Err(FactorError::Configuration(_))));

        let config = FactorConfig {
            start_timestamp: Some(parse_timestamp("2024-02-01").unwrap()),
            end_timestamp: Some(parse_timestamp("2024-01-01").unwrap()),
            ..FactorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FactorConfig {
            effective_number: Some(2),
            ..FactorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
