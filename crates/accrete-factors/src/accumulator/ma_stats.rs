//! Incremental moving-average statistics.
//!
//! Tracks a short and a long moving average of the close, whether the short one is above
//! the long one (`live`), how long that has been the case, and the accumulated distance
//! between them over the current run. Only the last `long` closes are carried over.

use crate::accumulator::IncrementalAccumulator;
use crate::error::{FactorError, Result};
use crate::transformer::ma_column;
use accrete_data::Column;
use accrete_data::frame::f64_values;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Columns produced besides the two moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaStatsColumn {
    /// `1` while the short average is above the long one, `-1` otherwise
    Live,
    /// Signed run length of `live`
    LiveCount,
    /// `(ma_short - ma_long) / close`
    Distance,
    /// Sum of `distance` over the current run
    Area,
}

impl MaStatsColumn {
    /// Column name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::LiveCount => "live_count",
            Self::Distance => "distance",
            Self::Area => "area",
        }
    }
}

/// Configuration for the [`MaStatsAccumulator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaStatsConfig {
    /// Short window (default: 5)
    pub short: usize,
    /// Long window (default: 10)
    pub long: usize,
}

impl Default for MaStatsConfig {
    fn default() -> Self {
        Self { short: 5, long: 10 }
    }
}

/// State carried between batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaStatsState {
    /// Last closes, at most `long` of them
    pub closes: VecDeque<f64>,
    /// Last `live` value
    pub live: Option<i64>,
    /// Last `live_count` value
    pub live_count: Option<i64>,
    /// Last `area` value
    pub area: Option<f64>,
}

#[derive(Debug, Default)]
struct MaStatsRows {
    ma_short: Vec<Option<f64>>,
    ma_long: Vec<Option<f64>>,
    live: Vec<Option<i64>>,
    live_count: Vec<Option<i64>>,
    distance: Vec<Option<f64>>,
    area: Vec<Option<f64>>,
}

/// Moving-average statistics accumulated bar by bar.
#[derive(Debug, Clone, Default)]
pub struct MaStatsAccumulator {
    config: MaStatsConfig,
}

impl MaStatsAccumulator {
    /// Create an accumulator with the given configuration.
    pub fn with_config(config: MaStatsConfig) -> Result<Self> {
        if config.short == 0 || config.short >= config.long {
            return Err(FactorError::Configuration(format!(
                "ma_stats needs 0 < short < long, got short={} long={}",
                config.short, config.long
            )));
        }
        Ok(Self { config })
    }

    /// Returns the current configuration.
    pub const fn config(&self) -> &MaStatsConfig {
        &self.config
    }

    fn mean_of_last(closes: &VecDeque<f64>, n: usize) -> Option<f64> {
        (closes.len() >= n).then(|| closes.iter().rev().take(n).sum::<f64>() / n as f64)
    }

    fn run(
        &self,
        rows: &DataFrame,
        mut state: MaStatsState,
    ) -> Result<(Vec<polars::prelude::Column>, MaStatsState)> {
        let closes = f64_values(rows, Column::Close.name())?;
        let mut out = MaStatsRows::default();

        for close in closes {
            let Some(close) = close else {
                out.ma_short.push(None);
                out.ma_long.push(None);
                out.live.push(None);
                out.live_count.push(None);
                out.distance.push(None);
                out.area.push(None);
                continue;
            };

            state.closes.push_back(close);
            while state.closes.len() > self.config.long {
                state.closes.pop_front();
            }
            let ma_short = Self::mean_of_last(&state.closes, self.config.short);
            let ma_long = Self::mean_of_last(&state.closes, self.config.long);

            let (live, live_count, distance, area) = match (ma_short, ma_long) {
                (Some(s), Some(l)) => {
                    let live = if s > l { 1 } else { -1 };
                    let distance = if close != 0.0 { (s - l) / close } else { 0.0 };
                    let continues = state.live == Some(live);
                    let live_count = match state.live_count {
                        Some(count) if continues => count + live,
                        _ => live,
                    };
                    let area = match state.area {
                        Some(area) if continues => area + distance,
                        _ => distance,
                    };
                    (Some(live), Some(live_count), Some(distance), Some(area))
                }
                _ => (None, None, None, None),
            };
            state.live = live;
            state.live_count = live_count;
            state.area = area;

            out.ma_short.push(ma_short);
            out.ma_long.push(ma_long);
            out.live.push(live);
            out.live_count.push(live_count);
            out.distance.push(distance);
            out.area.push(area);
        }

        let names = IncrementalAccumulator::output_columns(self);
        let columns = vec![
            Series::new(names[0].as_str().into(), out.ma_short).into(),
            Series::new(names[1].as_str().into(), out.ma_long).into(),
            Series::new(MaStatsColumn::Live.name().into(), out.live).into(),
            Series::new(MaStatsColumn::LiveCount.name().into(), out.live_count).into(),
            Series::new(MaStatsColumn::Distance.name().into(), out.distance).into(),
            Series::new(MaStatsColumn::Area.name().into(), out.area).into(),
        ];
        Ok((columns, state))
    }
}

impl IncrementalAccumulator for MaStatsAccumulator {
    type State = MaStatsState;

    fn name(&self) -> &str {
        "ma_stats"
    }

    fn output_columns(&self) -> Vec<String> {
        vec![
            ma_column(self.config.short),
            ma_column(self.config.long),
            MaStatsColumn::Live.name().to_string(),
            MaStatsColumn::LiveCount.name().to_string(),
            MaStatsColumn::Distance.name().to_string(),
            MaStatsColumn::Area.name().to_string(),
        ]
    }

    fn required_columns(&self) -> Vec<Column> {
        vec![Column::Close]
    }

    fn cold_start(
        &self,
        _entity_id: &str,
        rows: &DataFrame,
    ) -> Result<(Vec<polars::prelude::Column>, Self::State)> {
        self.run(rows, MaStatsState::default())
    }

    fn resume(
        &self,
        _entity_id: &str,
        rows: &DataFrame,
        state: Self::State,
    ) -> Result<(Vec<polars::prelude::Column>, Self::State)> {
        self.run(rows, state)
    }

    fn check_state(&self, entity_id: &str, state: &Self::State) -> Result<()> {
        if state.closes.len() > self.config.long {
            return Err(FactorError::StateCorruption {
                entity_id: entity_id.to_string(),
                reason: format!(
                    "{} closes carried for a window of {}",
                    state.closes.len(),
                    self.config.long
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{Accumulator, FactorState};
    use accrete_data::Bar;
    use accrete_data::frame::{bars_to_frame, slice_rows};
    use accrete_data::model::parse_timestamp;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn frame(closes: &[f64]) -> DataFrame {
        let start = parse_timestamp("2024-01-01").unwrap();
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar::new("a_x_1", start + Duration::days(i as i64), *c, *c, *c, *c))
            .collect();
        bars_to_frame(&bars).unwrap()
    }

    fn accumulator() -> MaStatsAccumulator {
        MaStatsAccumulator::with_config(MaStatsConfig { short: 2, long: 3 }).unwrap()
    }

    #[test]
    fn test_ma_stats_values() {
        let df = frame(&[1.0, 2.0, 3.0, 2.0, 1.0]);
        let acc = accumulator().accumulate("a_x_1", &df, None, None).unwrap();
        let result = acc.result;

        assert_eq!(
            f64_values(&result, "ma3").unwrap(),
            vec![None, None, Some(2.0), Some(7.0 / 3.0), Some(2.0)]
        );
        assert_eq!(
            f64_values(&result, "live").unwrap(),
            vec![None, None, Some(1.0), Some(1.0), Some(-1.0)]
        );
        assert_eq!(
            f64_values(&result, "live_count").unwrap(),
            vec![None, None, Some(1.0), Some(2.0), Some(-1.0)]
        );
        let distance = f64_values(&result, "distance").unwrap();
        let area = f64_values(&result, "area").unwrap();
        assert_relative_eq!(distance[2].unwrap(), 0.5 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(area[3].unwrap(), 0.5 / 3.0 + (2.5 - 7.0 / 3.0) / 2.0, epsilon = 1e-12);
        assert_relative_eq!(area[4].unwrap(), distance[4].unwrap(), epsilon = 1e-12);

        let state: MaStatsState = acc.state.to_typed().unwrap();
        assert_eq!(state.closes, VecDeque::from(vec![3.0, 2.0, 1.0]));
    }

    #[test]
    fn test_incremental_matches_batch() {
        let closes = [5.0, 4.0, 6.0, 7.0, 6.5, 6.0, 5.0, 5.5, 7.5, 8.0, 7.0];
        let df = frame(&closes);
        let acc = accumulator();
        let batch = acc.accumulate("a_x_1", &df, None, None).unwrap();

        for split in [1, 2, 4, 7, 10] {
            let first = acc
                .accumulate("a_x_1", &slice_rows(&df, 0, split), None, None)
                .unwrap();
            let second = acc
                .accumulate("a_x_1", &df, Some(&first.result), Some(&first.state))
                .unwrap();
            assert!(second.result.equals_missing(&batch.result), "split at {}", split);
            assert_eq!(second.state, batch.state);
        }
    }

    #[test]
    fn test_missing_state_is_corruption() {
        let df = frame(&[1.0, 2.0, 3.0]);
        let acc = accumulator();
        let first = acc.accumulate("a_x_1", &df, None, None).unwrap();
        let err = acc.accumulate("a_x_1", &df, Some(&first.result), None);
        assert!(matches!(err, Err(FactorError::StateCorruption { .. })));

        let bad = FactorState::decode(r#"{"closes":[1.0,2.0,3.0,4.0]}"#).unwrap();
        let err = acc.accumulate("a_x_1", &df, Some(&first.result), Some(&bad));
        assert!(matches!(err, Err(FactorError::StateCorruption { .. })));
    }

    #[test]
    fn test_invalid_windows() {
        assert!(MaStatsAccumulator::with_config(MaStatsConfig { short: 5, long: 5 }).is_err());
    }
}
