//! Moving average transformer.
//!
//! Adds one `ma{n}` column per configured window, and optionally the bar-over-bar
//! `change_pct` of the source column.

use crate::algorithm::{apply_grouped, moving_average, pct_change};
use crate::error::Result;
use crate::transformer::Transformer;
use accrete_data::Column;
use accrete_data::frame::require_columns;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

/// Name of the change column.
pub const CHANGE_PCT: &str = "change_pct";

/// Name of the moving average column for a window.
pub fn ma_column(window: usize) -> String {
    format!("ma{}", window)
}

/// Configuration for the [`MaTransformer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaConfig {
    /// Rolling windows (default: 5, 10, 34)
    pub windows: Vec<usize>,
    /// Column to average (default: close)
    pub source: Column,
    /// Also add `change_pct` (default: false)
    pub cal_change_pct: bool,
}

impl Default for MaConfig {
    fn default() -> Self {
        Self {
            windows: vec![5, 10, 34],
            source: Column::Close,
            cal_change_pct: false,
        }
    }
}

/// Rolling mean of one column per entity.
#[derive(Debug, Clone, Default)]
pub struct MaTransformer {
    config: MaConfig,
}

impl MaTransformer {
    /// Create a transformer with the given configuration.
    pub const fn with_config(config: MaConfig) -> Self {
        Self { config }
    }

    /// Create a transformer over the close price with the given windows.
    pub fn with_windows(windows: &[usize]) -> Self {
        Self::with_config(MaConfig {
            windows: windows.to_vec(),
            ..MaConfig::default()
        })
    }

    /// Returns the current configuration.
    pub const fn config(&self) -> &MaConfig {
        &self.config
    }
}

impl Transformer for MaTransformer {
    fn name(&self) -> &str {
        "ma"
    }

    fn indicators(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.windows.iter().map(|w| ma_column(*w)).collect();
        if self.config.cal_change_pct {
            names.push(CHANGE_PCT.to_string());
        }
        names
    }

    fn required_columns(&self) -> Vec<Column> {
        vec![self.config.source]
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        require_columns(df, &[self.config.source.name()])?;
        let windows = self.config.windows.clone();
        let cal_change_pct = self.config.cal_change_pct;

        apply_grouped(df, self.config.source.name(), &self.indicators(), |values| {
            let mut outputs: Vec<Vec<Option<f64>>> =
                windows.iter().map(|w| moving_average(values, *w)).collect();
            if cal_change_pct {
                outputs.push(pct_change(values));
            }
            outputs
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrete_data::Bar;
    use accrete_data::frame::{bars_to_frame, f64_values};
    use accrete_data::model::parse_timestamp;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn frame(entities: &[(&str, &[f64])]) -> DataFrame {
        let start = parse_timestamp("2024-01-01").unwrap();
        let bars: Vec<Bar> = entities
            .iter()
            .flat_map(|(id, closes)| {
                closes.iter().enumerate().map(move |(i, c)| {
                    Bar::new(*id, start + Duration::days(i as i64), *c, *c, *c, *c)
                })
            })
            .collect();
        bars_to_frame(&bars).unwrap()
    }

    #[test]
    fn test_ma_columns() {
        let df = frame(&[("a_x_1", &[1.0, 2.0, 3.0, 4.0, 5.0]), ("a_x_2", &[10.0, 20.0])]);
        let transformer = MaTransformer::with_windows(&[3]);
        let out = transformer.transform(&df).unwrap();

        assert_eq!(out.height(), df.height());
        assert_eq!(
            f64_values(&out, "ma3").unwrap(),
            vec![None, None, Some(2.0), Some(3.0), Some(4.0), None, None]
        );
    }

    #[test]
    fn test_change_pct() {
        let df = frame(&[("a_x_1", &[10.0, 12.0]), ("a_x_2", &[5.0, 4.0])]);
        let transformer = MaTransformer::with_config(MaConfig {
            windows: vec![],
            cal_change_pct: true,
            ..Default::default()
        });
        assert_eq!(transformer.indicators(), vec![CHANGE_PCT.to_string()]);

        let out = transformer.transform(&df).unwrap();
        let change = f64_values(&out, CHANGE_PCT).unwrap();
        assert_eq!(change[0], None);
        assert_relative_eq!(change[1].unwrap(), 0.2, epsilon = 1e-12);
        assert_eq!(change[2], None);
        assert_relative_eq!(change[3].unwrap(), -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_is_idempotent() {
        let df = frame(&[("a_x_1", &[1.0, 3.0, 2.0, 5.0, 4.0, 6.0])]);
        let transformer = MaTransformer::with_windows(&[2, 3]);
        let once = transformer.transform(&df).unwrap();
        let twice = transformer.transform(&once).unwrap();
        assert_eq!(once.get_column_names(), twice.get_column_names());
        assert!(once.equals_missing(&twice));
    }

    #[test]
    fn test_missing_source_column() {
        let df = frame(&[("a_x_1", &[1.0])]).drop("close").unwrap();
        assert!(MaTransformer::default().transform(&df).is_err());
    }
}
