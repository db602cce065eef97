//! Grouped window algorithms.
//!
//! Every function here works on one entity's ordered series. Missing inputs and windows
//! that have not filled yet produce missing outputs, never zeros. [`apply_grouped`] runs a
//! kernel over each entity block of a multi-entity frame so no window reads across
//! entities.

use crate::error::{FactorError, Result};
use accrete_data::frame::{entity_groups, f64_values};
use polars::prelude::*;

/// Simple rolling mean. Positions before `window` values, or whose window holds a missing
/// value, are missing.
pub fn moving_average(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let sum = slice.iter().copied().sum::<Option<f64>>()?;
            Some(sum / window as f64)
        })
        .collect()
}

/// Recursive exponential moving average with smoothing factor `2 / (window + 1)`.
///
/// Seeded with the first value; missing inputs are skipped and yield missing outputs.
/// Output stays missing until `window` values have been seen.
pub fn exponential_moving_average(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut ema: Option<f64> = None;
    let mut seen = 0usize;

    values
        .iter()
        .map(|value| {
            let x = (*value)?;
            let next = ema.map_or(x, |prev| alpha * x + (1.0 - alpha) * prev);
            ema = Some(next);
            seen += 1;
            (seen >= window).then_some(next)
        })
        .collect()
}

/// MACD components.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    /// Fast EMA minus slow EMA
    pub diff: Vec<Option<f64>>,
    /// EMA of `diff` over the signal window
    pub dea: Vec<Option<f64>>,
    /// `(diff - dea) * 2`
    pub macd: Vec<Option<f64>>,
}

/// Compute MACD over one series.
pub fn macd(values: &[Option<f64>], slow: usize, fast: usize, signal: usize) -> Macd {
    let slow_ema = exponential_moving_average(values, slow);
    let fast_ema = exponential_moving_average(values, fast);
    let diff: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let dea = exponential_moving_average(&diff, signal);
    let macd = diff
        .iter()
        .zip(&dea)
        .map(|(d, e)| Some(((*d)? - (*e)?) * 2.0))
        .collect();
    Macd { diff, dea, macd }
}

/// Relative change from the previous value. The first value is missing.
pub fn pct_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let change = match (i.checked_sub(1).and_then(|p| values[p]), values[i]) {
            (Some(prev), Some(curr)) if prev != 0.0 => Some((curr - prev) / prev),
            _ => None,
        };
        out.push(change);
    }
    out
}

/// Signed run length: `n` for the n-th consecutive `true`, `-n` for the n-th consecutive
/// `false`. A missing flag is missing and breaks the run.
pub fn consecutive_count(flags: &[Option<bool>]) -> Vec<Option<i64>> {
    let mut run: i64 = 0;
    flags
        .iter()
        .map(|flag| match flag {
            Some(true) => {
                run = if run > 0 { run + 1 } else { 1 };
                Some(run)
            }
            Some(false) => {
                run = if run < 0 { run - 1 } else { -1 };
                Some(run)
            }
            None => {
                run = 0;
                None
            }
        })
        .collect()
}

/// Intersection of two closed ranges given as `(low, high)`.
pub fn intersect(a: (f64, f64), b: (f64, f64)) -> Option<(f64, f64)> {
    let low = a.0.max(b.0);
    let high = a.1.min(b.1);
    (low <= high).then_some((low, high))
}

/// `column` as `f64` with NaN turned into a missing value.
fn finite(column: &str) -> Expr {
    let value = col(column).cast(DataType::Float64);
    when(value.clone().is_nan())
        .then(lit(NULL))
        .otherwise(value)
}

/// Percentile rank of `column` among the rows sharing the same `key` (timestamp).
///
/// Ties share their average rank; the result is `rank / count`, so the best value scores
/// `1.0`. Missing and NaN values stay missing and are not counted.
pub fn rank_score(column: &str, key: &str, ascending: bool) -> Expr {
    let value = finite(column);
    let rank = value
        .clone()
        .rank(
            RankOptions {
                method: RankMethod::Average,
                descending: !ascending,
            },
            None,
        )
        .over([col(key)]);
    let count = value.count().over([col(key)]).cast(DataType::Float64);
    (rank / count).alias(column)
}

/// Bucket score of `column` per `key`: the highest level whose linear-interpolated
/// cross-sectional quantile the value reaches, or `0.0` below the lowest level. Levels
/// must lie in `[0, 1]`.
pub fn quantile_score(column: &str, key: &str, levels: &[f64]) -> Expr {
    let mut levels = levels.to_vec();
    levels.sort_by(f64::total_cmp);

    let value = finite(column);
    let bucket = levels.iter().fold(lit(0.0), |below, level| {
        let threshold = value
            .clone()
            .quantile(lit(*level), QuantileMethod::Linear)
            .over([col(key)]);
        when(value.clone().gt_eq(threshold))
            .then(lit(*level))
            .otherwise(below)
    });
    when(value.is_null())
        .then(lit(NULL))
        .otherwise(bucket)
        .cast(DataType::Float64)
        .alias(column)
}

/// Run a kernel over one numeric column of every entity block and attach its outputs.
///
/// The kernel receives the block's values of `source` and returns one vector per output
/// name, each as long as the block. Outputs replace same-named columns, so applying the
/// same kernel twice leaves the frame unchanged.
pub fn apply_grouped<F>(
    df: &DataFrame,
    source: &str,
    outputs: &[String],
    kernel: F,
) -> Result<DataFrame>
where
    F: Fn(&[Option<f64>]) -> Vec<Vec<Option<f64>>>,
{
    let values = f64_values(df, source)?;
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(df.height()); outputs.len()];

    for group in entity_groups(df)? {
        let produced = kernel(&values[group.range()]);
        if produced.len() != outputs.len() || produced.iter().any(|c| c.len() != group.len) {
            return Err(FactorError::Computation(format!(
                "Kernel over {} returned a mis-shaped result for {}",
                source, group.entity_id
            )));
        }
        for (column, block) in columns.iter_mut().zip(produced) {
            column.extend(block);
        }
    }

    let mut out = df.clone();
    for (name, column) in outputs.iter().zip(columns) {
        out.with_column(Series::new(name.as_str().into(), column))?;
    }
    Ok(out)
}
