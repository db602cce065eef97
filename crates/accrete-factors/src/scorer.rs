//! Cross-sectional scorers.
//!
//! A [`Scorer`] turns raw indicator values into comparable scores in `[0, 1]`, computed
//! per timestamp across entities. The output keeps the key columns, replaces each scored
//! column with its score and adds [`SCORE_RESULT`], the mean of the scores.

use crate::algorithm::{quantile_score, rank_score};
use crate::error::Result;
use accrete_data::Column;
use accrete_data::frame::require_columns;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the combined score column.
pub const SCORE_RESULT: &str = "score_result";

/// Cross-sectional normalization of indicator columns.
pub trait Scorer: fmt::Debug {
    /// Unique identifier for this scorer.
    fn name(&self) -> &str;

    /// Columns that are scored.
    fn columns(&self) -> &[String];

    /// Expression replacing `column` with its score, grouped by timestamp.
    fn score_expr(&self, column: &str) -> Expr;

    /// Score every configured column of `df`.
    fn score(&self, df: &DataFrame) -> Result<DataFrame> {
        let names: Vec<&str> = self.columns().iter().map(String::as_str).collect();
        require_columns(df, &names)?;

        let mut selected = vec![
            col(Column::EntityId.name()),
            col(Column::Timestamp.name()),
        ];
        selected.extend(names.iter().map(|name| self.score_expr(name)));

        let out = df
            .clone()
            .lazy()
            .select(selected)
            .with_column(mean_of_present(&names).alias(SCORE_RESULT))
            .collect()?;
        Ok(out)
    }
}

/// Row-wise mean over the columns that are present; missing when none is.
fn mean_of_present(names: &[&str]) -> Expr {
    let sum = names
        .iter()
        .map(|name| col(*name).fill_null(lit(0.0)))
        .reduce(|a, b| a + b);
    let present = names
        .iter()
        .map(|name| col(*name).is_not_null().cast(DataType::Float64))
        .reduce(|a, b| a + b);

    match (sum, present) {
        (Some(sum), Some(present)) => when(present.clone().gt(lit(0.0)))
            .then(sum / present)
            .otherwise(lit(NULL))
            .cast(DataType::Float64),
        _ => lit(NULL).cast(DataType::Float64),
    }
}

/// Percentile rank per timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankScorer {
    /// Columns to rank
    pub columns: Vec<String>,
    /// Smallest value ranks lowest (default: false, largest value ranks lowest)
    pub ascending: bool,
}

impl RankScorer {
    /// Rank the given columns, largest value first when `ascending` is false.
    pub fn new<I, S>(columns: I, ascending: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ascending,
        }
    }
}

impl Scorer for RankScorer {
    fn name(&self) -> &str {
        "rank"
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn score_expr(&self, column: &str) -> Expr {
        rank_score(column, Column::Timestamp.name(), self.ascending)
    }
}

/// Quantile bucket per timestamp: the highest level whose quantile the value reaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantileScorer {
    /// Columns to score
    pub columns: Vec<String>,
    /// Quantile levels (default: 0.1, 0.3, 0.5, 0.7, 0.9)
    pub levels: Vec<f64>,
}

impl Default for QuantileScorer {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            levels: vec![0.1, 0.3, 0.5, 0.7, 0.9],
        }
    }
}

impl QuantileScorer {
    /// Score the given columns with the default levels.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Scorer for QuantileScorer {
    fn name(&self) -> &str {
        "quantile"
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn score_expr(&self, column: &str) -> Expr {
        quantile_score(column, Column::Timestamp.name(), &self.levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrete_data::frame::{f64_values, key_frame};
    use accrete_data::model::parse_timestamp;
    use approx::assert_relative_eq;

    fn frame() -> DataFrame {
        let day1 = parse_timestamp("2024-01-02").unwrap();
        let day2 = parse_timestamp("2024-01-03").unwrap();
        let ids: Vec<String> = ["a", "a", "b", "b", "c", "c"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let times = [day1, day2, day1, day2, day1, day2];
        let mut df = key_frame(&ids, &times).unwrap();
        df.with_column(Series::new(
            "change_pct".into(),
            vec![Some(0.1), Some(-0.2), Some(0.3), None, Some(0.2), Some(0.5)],
        ))
        .unwrap();
        df.with_column(Series::new(
            "volume".into(),
            vec![Some(10.0), Some(1.0), Some(30.0), Some(3.0), Some(20.0), Some(2.0)],
        ))
        .unwrap();
        df
    }

    #[test]
    fn test_rank_scorer() {
        let out = RankScorer::new(["change_pct"], true).score(&frame()).unwrap();
        assert_eq!(out.width(), 4);

        let scores = f64_values(&out, "change_pct").unwrap();
        assert_relative_eq!(scores[0].unwrap(), 1.0 / 3.0);
        assert_relative_eq!(scores[2].unwrap(), 1.0);
        assert_relative_eq!(scores[4].unwrap(), 2.0 / 3.0);
        // day two only ranks the entities with a value
        assert_relative_eq!(scores[1].unwrap(), 0.5);
        assert_eq!(scores[3], None);
        assert_relative_eq!(scores[5].unwrap(), 1.0);

        let result = f64_values(&out, SCORE_RESULT).unwrap();
        assert_eq!(result, scores);
    }

    #[test]
    fn test_rank_scorer_mean_of_columns() {
        let out = RankScorer::new(["change_pct", "volume"], true)
            .score(&frame())
            .unwrap();
        let result = f64_values(&out, SCORE_RESULT).unwrap();
        // b on day two only has a volume score
        assert_relative_eq!(result[3].unwrap(), 1.0);
        assert_relative_eq!(result[0].unwrap(), 1.0 / 3.0);
    }

    #[test]
    fn test_quantile_scorer() {
        let scorer = QuantileScorer {
            columns: vec!["volume".to_string()],
            levels: vec![0.5, 0.9],
        };
        let out = scorer.score(&frame()).unwrap();
        let scores = f64_values(&out, "volume").unwrap();
        // day one: 10, 30, 20 -> median 20, 0.9 quantile 28
        assert_eq!(scores[0], Some(0.0));
        assert_eq!(scores[2], Some(0.9));
        assert_eq!(scores[4], Some(0.5));
    }

    #[test]
    fn test_missing_column() {
        assert!(RankScorer::new(["nope"], true).score(&frame()).is_err());
    }
}
