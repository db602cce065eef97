//! Time-series storage used by the factor pipeline.
//!
//! The pipeline only needs to read raw bars by entity and time range, read and write
//! factor rows, and read and write one opaque state blob per `(factor_name, entity_id)`.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{Bar, Column};
use chrono::NaiveDateTime;
use derive_more::Display;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Conflict policy for row upserts.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    /// Keep the existing row
    #[default]
    #[display("skip_existing")]
    SkipExisting,
    /// Replace the existing row
    #[display("overwrite")]
    Overwrite,
}

/// Id of a persisted state blob.
pub fn state_id(factor_name: &str, entity_id: &str) -> String {
    format!("{}_{}", factor_name, entity_id)
}

/// Storage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of raw bars
    pub bars: usize,
    /// Number of entities with bars
    pub entities: usize,
    /// Number of persisted factor rows
    pub factor_rows: usize,
    /// Number of persisted state blobs
    pub factor_states: usize,
}

/// Read/write contract between the factor pipeline and its storage.
///
/// Frames returned by queries are sorted by `(entity_id, timestamp)` and always carry the
/// key columns.
pub trait TimeSeriesStore: fmt::Debug {
    /// Raw bars of the given entities within `[start, end]`. An empty `columns` slice
    /// selects every raw column.
    fn query_time_series(
        &self,
        entity_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        columns: &[Column],
    ) -> Result<DataFrame>;

    /// Persisted factor rows of the given entities within `[start, end]`.
    fn query_factor_result(
        &self,
        factor_name: &str,
        entity_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<DataFrame>;

    /// Persisted state blobs, keyed by entity id. Entities without state are absent.
    fn query_factor_state(
        &self,
        factor_name: &str,
        entity_ids: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Insert or replace raw bars. Returns the number of rows written.
    fn upsert_bars(&self, bars: &[Bar]) -> Result<usize>;

    /// Insert factor rows. Returns the number of rows written.
    fn upsert_factor_result(
        &self,
        factor_name: &str,
        rows: &DataFrame,
        on_conflict: OnConflict,
    ) -> Result<usize>;

    /// Insert or replace one state blob.
    fn upsert_factor_state(&self, factor_name: &str, entity_id: &str, state: &str) -> Result<()>;

    /// Delete the state blob of one entity.
    fn delete_state(&self, factor_name: &str, entity_id: &str) -> Result<()>;

    /// Delete every persisted factor row of one entity.
    fn delete_result(&self, factor_name: &str, entity_id: &str) -> Result<()>;

    /// Every entity with raw bars, sorted.
    fn entity_ids(&self) -> Result<Vec<String>>;

    /// Timestamp of the newest raw bar of one entity.
    fn latest_timestamp(&self, entity_id: &str) -> Result<Option<NaiveDateTime>>;

    /// Storage statistics.
    fn stats(&self) -> Result<StoreStats>;

    /// Write one entity's new factor rows together with its new state.
    ///
    /// Either both land or neither does: when the row write fails the previous state blob
    /// is restored (or removed if there was none) and the error is returned.
    fn commit_entity(
        &self,
        factor_name: &str,
        entity_id: &str,
        rows: &DataFrame,
        state: Option<&str>,
    ) -> Result<()> {
        let previous = self
            .query_factor_state(factor_name, &[entity_id.to_string()])?
            .remove(entity_id);

        if let Some(state) = state {
            self.upsert_factor_state(factor_name, entity_id, state)?;
        }

        if let Err(err) = self.upsert_factor_result(factor_name, rows, OnConflict::Overwrite) {
            match previous {
                Some(previous) => self.upsert_factor_state(factor_name, entity_id, &previous)?,
                None => self.delete_state(factor_name, entity_id)?,
            }
            return Err(err);
        }
        Ok(())
    }
}
