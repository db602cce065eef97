//! Chan-analysis accumulator.

use crate::accumulator::IncrementalAccumulator;
use crate::error::{FactorError, Result};
use crate::zen::model::{KBar, Rect};
use crate::zen::state::{BOOTSTRAP_SPAN, MIN_BOOTSTRAP_BARS, ZenRow, ZenState, bootstrap, step};
use accrete_data::Column;
use accrete_data::frame::f64_values;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Columns produced by the [`ZenAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZenColumn {
    /// Running stroke direction, `up` or `down`
    Direction,
    /// Previous bar is a temporary top
    TmpDing,
    /// Previous bar is a temporary bottom
    TmpDi,
    /// Strength of the temporary extremum
    FenxingPower,
    /// A top was confirmed
    BiDing,
    /// A bottom was confirmed
    BiDi,
    /// Position of the confirmed turning point
    BiIndex,
    /// Price of the confirmed turning point
    BiValue,
    /// Relative change of the stroke ending there
    BiChange,
    /// `bi_change` per bar
    BiSlope,
    /// Bars spanned by the stroke
    BiInterval,
    /// Running segment state, `yi`, `up` or `down`
    DuanState,
    /// Position of the confirmed segment boundary
    DuanIndex,
    /// Price of the confirmed segment boundary
    DuanValue,
    /// Relative change of the segment ending there
    DuanChange,
    /// `duan_change` per bar
    DuanSlope,
    /// Bars spanned by the segment
    DuanInterval,
    /// Stroke-level center start
    BiZhongshuX0,
    /// Stroke-level center end
    BiZhongshuX1,
    /// Stroke-level center lower bound
    BiZhongshuY0,
    /// Stroke-level center upper bound
    BiZhongshuY1,
    /// Stroke-level center width relative to its lower bound
    BiZhongshuChange,
    /// Stroke-level center length in bars
    BiZhongshuInterval,
    /// Segment-level center start
    ZhongshuX0,
    /// Segment-level center end
    ZhongshuX1,
    /// Segment-level center lower bound
    ZhongshuY0,
    /// Segment-level center upper bound
    ZhongshuY1,
    /// Segment-level center width relative to its lower bound
    ZhongshuChange,
    /// Segment-level center length in bars
    ZhongshuInterval,
}

impl ZenColumn {
    /// Every column, in output order.
    pub const ALL: [Self; 29] = [
        Self::Direction,
        Self::TmpDing,
        Self::TmpDi,
        Self::FenxingPower,
        Self::BiDing,
        Self::BiDi,
        Self::BiIndex,
        Self::BiValue,
        Self::BiChange,
        Self::BiSlope,
        Self::BiInterval,
        Self::DuanState,
        Self::DuanIndex,
        Self::DuanValue,
        Self::DuanChange,
        Self::DuanSlope,
        Self::DuanInterval,
        Self::BiZhongshuX0,
        Self::BiZhongshuX1,
        Self::BiZhongshuY0,
        Self::BiZhongshuY1,
        Self::BiZhongshuChange,
        Self::BiZhongshuInterval,
        Self::ZhongshuX0,
        Self::ZhongshuX1,
        Self::ZhongshuY0,
        Self::ZhongshuY1,
        Self::ZhongshuChange,
        Self::ZhongshuInterval,
    ];

    /// Column name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Direction => "direction",
            Self::TmpDing => "tmp_ding",
            Self::TmpDi => "tmp_di",
            Self::FenxingPower => "fenxing_power",
            Self::BiDing => "bi_ding",
            Self::BiDi => "bi_di",
            Self::BiIndex => "bi_index",
            Self::BiValue => "bi_value",
            Self::BiChange => "bi_change",
            Self::BiSlope => "bi_slope",
            Self::BiInterval => "bi_interval",
            Self::DuanState => "duan_state",
            Self::DuanIndex => "duan_index",
            Self::DuanValue => "duan_value",
            Self::DuanChange => "duan_change",
            Self::DuanSlope => "duan_slope",
            Self::DuanInterval => "duan_interval",
            Self::BiZhongshuX0 => "bi_zhongshu_x0",
            Self::BiZhongshuX1 => "bi_zhongshu_x1",
            Self::BiZhongshuY0 => "bi_zhongshu_y0",
            Self::BiZhongshuY1 => "bi_zhongshu_y1",
            Self::BiZhongshuChange => "bi_zhongshu_change",
            Self::BiZhongshuInterval => "bi_zhongshu_interval",
            Self::ZhongshuX0 => "zhongshu_x0",
            Self::ZhongshuX1 => "zhongshu_x1",
            Self::ZhongshuY0 => "zhongshu_y0",
            Self::ZhongshuY1 => "zhongshu_y1",
            Self::ZhongshuChange => "zhongshu_change",
            Self::ZhongshuInterval => "zhongshu_interval",
        }
    }
}

/// Configuration for the [`ZenAccumulator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZenConfig {
    /// Bars scanned before the first turning point is searched for (default: 11)
    pub bootstrap_bars: usize,
}

impl Default for ZenConfig {
    fn default() -> Self {
        Self {
            bootstrap_bars: MIN_BOOTSTRAP_BARS,
        }
    }
}

/// Turning points, strokes, segments and centers of an entity's bars.
#[derive(Debug, Clone, Default)]
pub struct ZenAccumulator {
    config: ZenConfig,
}

impl ZenAccumulator {
    /// Create an accumulator with the given configuration.
    pub fn with_config(config: ZenConfig) -> Result<Self> {
        if config.bootstrap_bars <= BOOTSTRAP_SPAN {
            return Err(FactorError::Configuration(format!(
                "zen needs more than {} bootstrap bars, got {}",
                BOOTSTRAP_SPAN, config.bootstrap_bars
            )));
        }
        Ok(Self { config })
    }

    /// Returns the current configuration.
    pub const fn config(&self) -> &ZenConfig {
        &self.config
    }
}

/// Bars of a batch; rows with a missing price are `None` and are skipped by the state
/// machine.
fn kbars(rows: &DataFrame, first_index: usize) -> Result<Vec<Option<KBar>>> {
    let high = f64_values(rows, Column::High.name())?;
    let low = f64_values(rows, Column::Low.name())?;
    let close = f64_values(rows, Column::Close.name())?;
    Ok(high
        .into_iter()
        .zip(low)
        .zip(close)
        .enumerate()
        .map(|(i, ((high, low), close))| {
            Some(KBar {
                index: first_index + i,
                high: high?,
                low: low?,
                close: close?,
            })
        })
        .collect())
}

fn fold(mut state: ZenState, bars: &[Option<KBar>], rows: &mut Vec<ZenRow>) -> ZenState {
    for bar in bars {
        match bar {
            Some(bar) => {
                let (next, row) = step(state, *bar);
                state = next;
                rows.push(row);
            }
            None => rows.push(ZenRow::default()),
        }
    }
    state
}

#[derive(Debug, Default)]
struct ZenColumns {
    direction: Vec<Option<String>>,
    tmp_ding: Vec<Option<bool>>,
    tmp_di: Vec<Option<bool>>,
    fenxing_power: Vec<Option<f64>>,
    bi_ding: Vec<Option<bool>>,
    bi_di: Vec<Option<bool>>,
    bi_index: Vec<Option<i64>>,
    bi_value: Vec<Option<f64>>,
    bi_change: Vec<Option<f64>>,
    bi_slope: Vec<Option<f64>>,
    bi_interval: Vec<Option<i64>>,
    duan_state: Vec<Option<String>>,
    duan_index: Vec<Option<i64>>,
    duan_value: Vec<Option<f64>>,
    duan_change: Vec<Option<f64>>,
    duan_slope: Vec<Option<f64>>,
    duan_interval: Vec<Option<i64>>,
    bi_zhongshu: RectColumns,
    zhongshu: RectColumns,
}

#[derive(Debug, Default)]
struct RectColumns {
    x0: Vec<Option<i64>>,
    x1: Vec<Option<i64>>,
    y0: Vec<Option<f64>>,
    y1: Vec<Option<f64>>,
    change: Vec<Option<f64>>,
    interval: Vec<Option<i64>>,
}

const fn position(index: usize) -> i64 {
    index as i64
}

impl RectColumns {
    fn push(&mut self, rect: Option<&Rect>) {
        self.x0.push(rect.map(|r| position(r.x0)));
        self.x1.push(rect.map(|r| position(r.x1)));
        self.y0.push(rect.map(|r| r.y0));
        self.y1.push(rect.map(|r| r.y1));
        self.change.push(rect.and_then(Rect::change));
        self.interval.push(rect.map(|r| position(r.interval())));
    }

    fn into_columns(self, names: [ZenColumn; 6]) -> Vec<polars::prelude::Column> {
        let [x0, x1, y0, y1, change, interval] = names;
        vec![
            Series::new(x0.name().into(), self.x0).into(),
            Series::new(x1.name().into(), self.x1).into(),
            Series::new(y0.name().into(), self.y0).into(),
            Series::new(y1.name().into(), self.y1).into(),
            Series::new(change.name().into(), self.change).into(),
            Series::new(interval.name().into(), self.interval).into(),
        ]
    }
}

impl ZenColumns {
    fn push(&mut self, row: &ZenRow) {
        self.direction.push(row.direction.map(|d| d.to_string()));
        self.tmp_ding.push(row.tmp_ding);
        self.tmp_di.push(row.tmp_di);
        self.fenxing_power.push(row.fenxing_power);
        self.bi_ding.push(row.bi_ding);
        self.bi_di.push(row.bi_di);
        self.bi_index.push(row.bi_index.map(position));
        self.bi_value.push(row.bi_value);
        self.bi_change.push(row.bi.and_then(|leg| leg.change));
        self.bi_slope.push(row.bi.and_then(|leg| leg.slope));
        self.bi_interval.push(row.bi.map(|leg| position(leg.interval)));
        self.duan_state.push(row.duan_state.map(|d| d.to_string()));
        self.duan_index.push(row.duan.map(|p| position(p.index)));
        self.duan_value.push(row.duan.map(|p| p.value));
        self.duan_change.push(row.duan_leg.and_then(|leg| leg.change));
        self.duan_slope.push(row.duan_leg.and_then(|leg| leg.slope));
        self.duan_interval.push(row.duan_leg.map(|leg| position(leg.interval)));
        self.bi_zhongshu.push(row.bi_zhongshu.as_ref());
        self.zhongshu.push(row.zhongshu.as_ref());
    }

    fn into_columns(self) -> Vec<polars::prelude::Column> {
        let mut columns: Vec<polars::prelude::Column> = vec![
            Series::new(ZenColumn::Direction.name().into(), self.direction).into(),
            Series::new(ZenColumn::TmpDing.name().into(), self.tmp_ding).into(),
            Series::new(ZenColumn::TmpDi.name().into(), self.tmp_di).into(),
            Series::new(ZenColumn::FenxingPower.name().into(), self.fenxing_power).into(),
            Series::new(ZenColumn::BiDing.name().into(), self.bi_ding).into(),
            Series::new(ZenColumn::BiDi.name().into(), self.bi_di).into(),
            Series::new(ZenColumn::BiIndex.name().into(), self.bi_index).into(),
            Series::new(ZenColumn::BiValue.name().into(), self.bi_value).into(),
            Series::new(ZenColumn::BiChange.name().into(), self.bi_change).into(),
            Series::new(ZenColumn::BiSlope.name().into(), self.bi_slope).into(),
            Series::new(ZenColumn::BiInterval.name().into(), self.bi_interval).into(),
            Series::new(ZenColumn::DuanState.name().into(), self.duan_state).into(),
            Series::new(ZenColumn::DuanIndex.name().into(), self.duan_index).into(),
            Series::new(ZenColumn::DuanValue.name().into(), self.duan_value).into(),
            Series::new(ZenColumn::DuanChange.name().into(), self.duan_change).into(),
            Series::new(ZenColumn::DuanSlope.name().into(), self.duan_slope).into(),
            Series::new(ZenColumn::DuanInterval.name().into(), self.duan_interval).into(),
        ];
        columns.extend(self.bi_zhongshu.into_columns([
            ZenColumn::BiZhongshuX0,
            ZenColumn::BiZhongshuX1,
            ZenColumn::BiZhongshuY0,
            ZenColumn::BiZhongshuY1,
            ZenColumn::BiZhongshuChange,
            ZenColumn::BiZhongshuInterval,
        ]));
        columns.extend(self.zhongshu.into_columns([
            ZenColumn::ZhongshuX0,
            ZenColumn::ZhongshuX1,
            ZenColumn::ZhongshuY0,
            ZenColumn::ZhongshuY1,
            ZenColumn::ZhongshuChange,
            ZenColumn::ZhongshuInterval,
        ]));
        columns
    }
}

fn to_columns(rows: &[ZenRow]) -> Vec<polars::prelude::Column> {
    let mut columns = ZenColumns::default();
    for row in rows {
        columns.push(row);
    }
    columns.into_columns()
}

impl IncrementalAccumulator for ZenAccumulator {
    type State = ZenState;

    fn name(&self) -> &str {
        "zen"
    }

    fn output_columns(&self) -> Vec<String> {
        ZenColumn::ALL.iter().map(|c| c.name().to_string()).collect()
    }

    fn required_columns(&self) -> Vec<Column> {
        vec![Column::High, Column::Low, Column::Close]
    }

    fn cold_start(
        &self,
        entity_id: &str,
        rows: &DataFrame,
    ) -> Result<(Vec<polars::prelude::Column>, Self::State)> {
        let bars = kbars(rows, 0)?;
        let valid: Vec<KBar> = bars.iter().flatten().copied().collect();
        let Some((state, start, first_row)) = bootstrap(&valid, self.config.bootstrap_bars) else {
            return Err(FactorError::InsufficientData {
                entity_id: entity_id.to_string(),
                required: valid.len().max(self.config.bootstrap_bars - 1) + 1,
                available: valid.len(),
            });
        };

        // rows up to and including the bootstrap bar
        let start_index = valid[start].index;
        let mut out = vec![ZenRow::default(); start_index];
        out.push(first_row);
        debug!(entity_id, start_index, "zen bootstrap");

        let mut state = fold(state, &bars[start_index + 1..], &mut out);
        state.next_index = rows.height();
        Ok((to_columns(&out), state))
    }

    fn resume(
        &self,
        _entity_id: &str,
        rows: &DataFrame,
        state: Self::State,
    ) -> Result<(Vec<polars::prelude::Column>, Self::State)> {
        let first_index = state.next_index;
        let bars = kbars(rows, first_index)?;
        let mut out = Vec::with_capacity(bars.len());
        let mut state = fold(state, &bars, &mut out);
        state.next_index = first_index + rows.height();
        Ok((to_columns(&out), state))
    }

    fn check_state(&self, entity_id: &str, state: &Self::State) -> Result<()> {
        state
            .validate()
            .map_err(|reason| FactorError::StateCorruption {
                entity_id: entity_id.to_string(),
                reason,
            })
    }
}
