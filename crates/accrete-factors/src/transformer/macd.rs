//! MACD transformer.

use crate::algorithm::{consecutive_count, macd};
use crate::error::Result;
use crate::transformer::Transformer;
use accrete_data::Column;
use accrete_data::frame::{entity_groups, f64_values, require_columns};
use derive_more::Display;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Columns produced by the [`MacdTransformer`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacdColumn {
    /// Fast EMA minus slow EMA
    #[display("diff")]
    Diff,
    /// Signal line, EMA of `diff`
    #[display("dea")]
    Dea,
    /// Histogram, `(diff - dea) * 2`
    #[display("macd")]
    Macd,
    /// `1` while `diff > dea`, `-1` otherwise
    #[display("live")]
    Live,
    /// Signed run length of the current live/dead state
    #[display("live_count")]
    LiveCount,
    /// `diff > 0 && dea > 0`
    #[display("bull")]
    Bull,
}

impl MacdColumn {
    /// Column name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Diff => "diff",
            Self::Dea => "dea",
            Self::Macd => "macd",
            Self::Live => "live",
            Self::LiveCount => "live_count",
            Self::Bull => "bull",
        }
    }
}

/// Configuration for the [`MacdTransformer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdConfig {
    /// Slow EMA window (default: 26)
    pub slow: usize,
    /// Fast EMA window (default: 12)
    pub fast: usize,
    /// Signal EMA window (default: 9)
    pub signal: usize,
    /// Divide the components by the close price (default: false)
    pub normal: bool,
    /// Add `live`, `live_count` and `bull` (default: false)
    pub count_live_dead: bool,
}

impl Default for MacdConfig {
    fn default() -> Self {
        Self {
            slow: 26,
            fast: 12,
            signal: 9,
            normal: false,
            count_live_dead: false,
        }
    }
}

/// MACD of the close price, per entity.
#[derive(Debug, Clone, Default)]
pub struct MacdTransformer {
    config: MacdConfig,
}

impl MacdTransformer {
    /// Create a transformer with the given configuration.
    pub const fn with_config(config: MacdConfig) -> Self {
        Self { config }
    }

    /// Returns the current configuration.
    pub const fn config(&self) -> &MacdConfig {
        &self.config
    }

    fn columns(&self) -> Vec<MacdColumn> {
        let mut columns = vec![MacdColumn::Diff, MacdColumn::Dea, MacdColumn::Macd];
        if self.config.count_live_dead {
            columns.extend([MacdColumn::Live, MacdColumn::LiveCount, MacdColumn::Bull]);
        }
        columns
    }
}

impl Transformer for MacdTransformer {
    fn name(&self) -> &str {
        "macd"
    }

    fn indicators(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn required_columns(&self) -> Vec<Column> {
        vec![Column::Close]
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        require_columns(df, &[Column::Close.name()])?;
        let close = f64_values(df, Column::Close.name())?;
        let height = df.height();

        let mut diff = Vec::with_capacity(height);
        let mut dea = Vec::with_capacity(height);
        let mut hist = Vec::with_capacity(height);
        let mut live: Vec<Option<i64>> = Vec::with_capacity(height);
        let mut live_count = Vec::with_capacity(height);
        let mut bull: Vec<Option<bool>> = Vec::with_capacity(height);

        for group in entity_groups(df)? {
            let closes = &close[group.range()];
            let mut result = macd(closes, self.config.slow, self.config.fast, self.config.signal);

            if self.config.normal {
                for series in [&mut result.diff, &mut result.dea, &mut result.macd] {
                    for (value, c) in series.iter_mut().zip(closes) {
                        *value = match (*value, c) {
                            (Some(v), Some(c)) if *c != 0.0 => Some(v / c),
                            _ => None,
                        };
                    }
                }
            }

            let flags: Vec<Option<bool>> = result
                .diff
                .iter()
                .zip(&result.dea)
                .map(|(d, e)| Some((*d)? > (*e)?))
                .collect();
            live.extend(flags.iter().map(|f| f.map(|up| if up { 1 } else { -1 })));
            live_count.extend(consecutive_count(&flags));
            bull.extend(
                result
                    .diff
                    .iter()
                    .zip(&result.dea)
                    .map(|(d, e)| Some((*d)? > 0.0 && (*e)? > 0.0)),
            );

            diff.extend(result.diff);
            dea.extend(result.dea);
            hist.extend(result.macd);
        }

        let mut out = df.clone();
        out.with_column(Series::new(MacdColumn::Diff.name().into(), diff))?;
        out.with_column(Series::new(MacdColumn::Dea.name().into(), dea))?;
        out.with_column(Series::new(MacdColumn::Macd.name().into(), hist))?;
        if self.config.count_live_dead {
            out.with_column(Series::new(MacdColumn::Live.name().into(), live))?;
            out.with_column(Series::new(MacdColumn::LiveCount.name().into(), live_count))?;
            out.with_column(Series::new(MacdColumn::Bull.name().into(), bull))?;
        }
        Ok(out)
    }
}
