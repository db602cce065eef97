//! Result signals.
//!
//! A [`Signal`] derives the final boolean [`FILTER_RESULT`] column of a factor from its
//! indicator columns. Missing inputs give a missing result, never `false`.

use crate::error::Result;
use crate::transformer::{MacdColumn, ma_column};
use accrete_data::Column;
use accrete_data::frame::{bool_values, f64_values, require_columns};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the boolean result column.
pub const FILTER_RESULT: &str = "filter_result";

/// Derivation of a boolean result from indicator columns.
pub trait Signal: fmt::Debug {
    /// Unique identifier for this signal.
    fn name(&self) -> &str;

    /// Indicator columns read by [`Signal::flags`].
    fn inputs(&self) -> Vec<String>;

    /// One flag per row of `df`.
    fn flags(&self, df: &DataFrame) -> Result<Vec<Option<bool>>>;

    /// Key columns of `df` plus [`FILTER_RESULT`].
    fn evaluate(&self, df: &DataFrame) -> Result<DataFrame> {
        let inputs = self.inputs();
        let names: Vec<&str> = inputs.iter().map(String::as_str).collect();
        require_columns(df, &names)?;
        let flags = self.flags(df)?;
        let mut out = df.select([Column::EntityId.name(), Column::Timestamp.name()])?;
        out.with_column(Series::new(FILTER_RESULT.into(), flags))?;
        Ok(out)
    }
}

fn all_of(
    columns: &[Vec<Option<f64>>],
    height: usize,
    test: impl Fn(&[f64]) -> bool,
) -> Vec<Option<bool>> {
    (0..height)
        .map(|row| {
            let values: Option<Vec<f64>> = columns.iter().map(|c| c[row]).collect();
            values.map(|v| test(&v))
        })
        .collect()
}

/// Close above every moving average.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAboveMas {
    /// Moving average windows
    pub windows: Vec<usize>,
}

impl Signal for CloseAboveMas {
    fn name(&self) -> &str {
        "close_above_mas"
    }

    fn inputs(&self) -> Vec<String> {
        std::iter::once(Column::Close.name().to_string())
            .chain(self.windows.iter().map(|w| ma_column(*w)))
            .collect()
    }

    fn flags(&self, df: &DataFrame) -> Result<Vec<Option<bool>>> {
        let columns = self
            .inputs()
            .iter()
            .map(|name| f64_values(df, name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(all_of(&columns, df.height(), |v| v[1..].iter().all(|ma| v[0] > *ma)))
    }
}

/// Moving averages strictly ordered, shortest window on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaAligned {
    /// Moving average windows
    pub windows: Vec<usize>,
}

impl Signal for MaAligned {
    fn name(&self) -> &str {
        "ma_aligned"
    }

    fn inputs(&self) -> Vec<String> {
        let mut windows = self.windows.clone();
        windows.sort_unstable();
        windows.into_iter().map(ma_column).collect()
    }

    fn flags(&self, df: &DataFrame) -> Result<Vec<Option<bool>>> {
        let columns = self
            .inputs()
            .iter()
            .map(|name| f64_values(df, name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(all_of(&columns, df.height(), |v| v.windows(2).all(|pair| pair[0] > pair[1])))
    }
}

/// MACD above zero on both lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdBull;

impl Signal for MacdBull {
    fn name(&self) -> &str {
        "macd_bull"
    }

    fn inputs(&self) -> Vec<String> {
        vec![MacdColumn::Bull.name().to_string()]
    }

    fn flags(&self, df: &DataFrame) -> Result<Vec<Option<bool>>> {
        Ok(bool_values(df, MacdColumn::Bull.name())?)
    }
}

/// Running zen segment is rising.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZenUptrend;

impl Signal for ZenUptrend {
    fn name(&self) -> &str {
        "zen_uptrend"
    }

    fn inputs(&self) -> Vec<String> {
        vec![crate::zen::ZenColumn::DuanState.name().to_string()]
    }

    fn flags(&self, df: &DataFrame) -> Result<Vec<Option<bool>>> {
        let name = crate::zen::ZenColumn::DuanState.name();
        let states = df.column(name)?.cast(&DataType::String)?;
        let flags = states
            .str()?
            .into_iter()
            .map(|state| state.map(|s| s == crate::zen::DuanState::Up.to_string()))
            .collect();
        Ok(flags)
    }
}

/// Short moving average above the long one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaLive;

impl Signal for MaLive {
    fn name(&self) -> &str {
        "ma_live"
    }

    fn inputs(&self) -> Vec<String> {
        vec![crate::accumulator::MaStatsColumn::Live.name().to_string()]
    }

    fn flags(&self, df: &DataFrame) -> Result<Vec<Option<bool>>> {
        let live = f64_values(df, crate::accumulator::MaStatsColumn::Live.name())?;
        Ok(live.into_iter().map(|v| v.map(|v| v > 0.0)).collect())
    }
}
