//! Stateful, incremental accumulators.
//!
//! An [`Accumulator`] extends an entity's previously accumulated result with new rows,
//! resuming from a small serializable [`FactorState`]. Feeding the rows in any sequence
//! of contiguous batches yields the same result and state as feeding them all at once.
//!
//! Concrete accumulators implement the typed [`IncrementalAccumulator`]; the blanket
//! implementation takes care of trimming already-finalized rows, decoding and checking
//! state, and stitching the new rows onto the previous result.

pub mod ma_stats;

pub use ma_stats::{MaStatsAccumulator, MaStatsColumn, MaStatsConfig, MaStatsState};

use crate::error::{FactorError, Result};
use accrete_data::Column;
use accrete_data::frame::{concat_aligned, last_timestamps, rows_after_timestamp};
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque per-entity state blob, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorState(serde_json::Value);

impl FactorState {
    /// Wrap a typed state.
    pub fn from_typed<T: Serialize>(state: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(state)?))
    }

    /// Decode into a typed state.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// Encode as a JSON string.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Decode from a JSON string.
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(raw)?))
    }

    /// The raw JSON value.
    pub const fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Output of one accumulation call.
#[derive(Debug, Clone)]
pub struct Accumulation {
    /// Previous result extended with the newly accumulated rows
    pub result: DataFrame,
    /// State after the last accumulated row
    pub state: FactorState,
}

/// Stateful mapping applied incrementally per entity.
pub trait Accumulator: fmt::Debug {
    /// Unique identifier for this accumulator.
    fn name(&self) -> &str;

    /// Names of the columns added to each accumulated row.
    fn output_columns(&self) -> Vec<String>;

    /// Raw columns the input rows must carry.
    fn required_columns(&self) -> Vec<Column>;

    /// Accumulate `new_rows` of one entity.
    ///
    /// Without a previous result this is a cold start over every row. Otherwise rows at or
    /// before the last previous timestamp are ignored and accumulation resumes from
    /// `previous_state`, which must then be present and well-formed
    /// ([`FactorError::StateCorruption`] otherwise).
    fn accumulate(
        &self,
        entity_id: &str,
        new_rows: &DataFrame,
        previous_result: Option<&DataFrame>,
        previous_state: Option<&FactorState>,
    ) -> Result<Accumulation>;
}

/// Typed accumulator; every implementor is an [`Accumulator`].
pub trait IncrementalAccumulator: fmt::Debug {
    /// Carried state.
    type State: Serialize + DeserializeOwned + fmt::Debug;

    /// Unique identifier for this accumulator.
    fn name(&self) -> &str;

    /// Names of the columns added to each accumulated row.
    fn output_columns(&self) -> Vec<String>;

    /// Raw columns the input rows must carry.
    fn required_columns(&self) -> Vec<Column>;

    /// Accumulate an entity's rows from scratch. Returns one column per output name, each
    /// as long as `rows`.
    fn cold_start(
        &self,
        entity_id: &str,
        rows: &DataFrame,
    ) -> Result<(Vec<polars::prelude::Column>, Self::State)>;

    /// Accumulate rows that follow the ones summarized by `state`.
    fn resume(
        &self,
        entity_id: &str,
        rows: &DataFrame,
        state: Self::State,
    ) -> Result<(Vec<polars::prelude::Column>, Self::State)>;

    /// Structural sanity check of a decoded state.
    fn check_state(&self, _entity_id: &str, _state: &Self::State) -> Result<()> {
        Ok(())
    }
}

fn decode_state<A: IncrementalAccumulator + ?Sized>(
    accumulator: &A,
    entity_id: &str,
    state: Option<&FactorState>,
) -> Result<A::State> {
    let corrupted = |reason: String| FactorError::StateCorruption {
        entity_id: entity_id.to_string(),
        reason,
    };
    let state = state.ok_or_else(|| corrupted("no state for a persisted result".to_string()))?;
    let typed: A::State = serde_json::from_value(state.value().clone())
        .map_err(|e| corrupted(e.to_string()))?;
    accumulator.check_state(entity_id, &typed)?;
    Ok(typed)
}

fn attach(rows: &DataFrame, columns: Vec<polars::prelude::Column>) -> Result<DataFrame> {
    let mut out = rows.clone();
    for column in columns {
        out.with_column(column)?;
    }
    Ok(out)
}

impl<T: IncrementalAccumulator> Accumulator for T {
    fn name(&self) -> &str {
        IncrementalAccumulator::name(self)
    }

    fn output_columns(&self) -> Vec<String> {
        IncrementalAccumulator::output_columns(self)
    }

    fn required_columns(&self) -> Vec<Column> {
        IncrementalAccumulator::required_columns(self)
    }

    fn accumulate(
        &self,
        entity_id: &str,
        new_rows: &DataFrame,
        previous_result: Option<&DataFrame>,
        previous_state: Option<&FactorState>,
    ) -> Result<Accumulation> {
        let previous = previous_result.filter(|df| df.height() > 0);

        let Some(previous) = previous else {
            let (columns, state) = self.cold_start(entity_id, new_rows)?;
            return Ok(Accumulation {
                result: attach(new_rows, columns)?,
                state: FactorState::from_typed(&state)?,
            });
        };

        let state = decode_state(self, entity_id, previous_state)?;
        let last = last_timestamps(previous)?
            .remove(entity_id)
            .ok_or_else(|| FactorError::Computation(format!(
                "Previous result does not belong to {}",
                entity_id
            )))?;
        let rows = rows_after_timestamp(new_rows, last)?;
        if rows.height() == 0 {
            return Ok(Accumulation {
                result: previous.clone(),
                state: FactorState::from_typed(&state)?,
            });
        }

        let (columns, state) = self.resume(entity_id, &rows, state)?;
        let fresh = attach(&rows, columns)?;
        Ok(Accumulation {
            result: concat_aligned(previous, &fresh)?,
            state: FactorState::from_typed(&state)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_state_round_trip() {
        let raw = r#"{"closes":[1.0,2.5],"live":-1}"#;
        let state = FactorState::decode(raw).unwrap();
        assert_eq!(FactorState::decode(&state.encode().unwrap()).unwrap(), state);
        assert_eq!(state.value()["live"], serde_json::json!(-1));
        assert!(FactorState::decode("{not json").is_err());
    }
}
