//! Helpers for multi-entity frames.
//!
//! A multi-entity frame is a polars `DataFrame` keyed by `(entity_id, timestamp)`. Rows of
//! one entity are contiguous and strictly increasing in time. Every stage of the factor
//! pipeline consumes and produces this shape, adding or removing columns but never
//! reordering rows.

use crate::error::{DataError, Result};
use crate::model::{Bar, Column, format_timestamp, from_millis, to_millis};
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Dtype of the timestamp column.
pub fn timestamp_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

/// Build a timestamp column from naive timestamps.
pub fn timestamp_column(
    name: &str,
    timestamps: &[NaiveDateTime],
) -> Result<polars::prelude::Column> {
    let millis: Vec<i64> = timestamps.iter().map(|ts| to_millis(*ts)).collect();
    let series = Series::new(name.into(), millis).cast(&timestamp_dtype())?;
    Ok(series.into())
}

/// Build a frame holding only the key columns.
pub fn key_frame(entity_ids: &[String], timestamps: &[NaiveDateTime]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Series::new(Column::EntityId.name().into(), entity_ids.to_vec()).into(),
        timestamp_column(Column::Timestamp.name(), timestamps)?,
    ])?)
}

/// An empty frame with the key columns only.
pub fn empty_frame() -> Result<DataFrame> {
    key_frame(&[], &[])
}

/// Convert bars into a multi-entity frame, preserving input order.
pub fn bars_to_frame(bars: &[Bar]) -> Result<DataFrame> {
    let entity_ids: Vec<String> = bars.iter().map(|b| b.entity_id.clone()).collect();
    let timestamps: Vec<NaiveDateTime> = bars.iter().map(|b| b.timestamp).collect();
    let mut df = key_frame(&entity_ids, &timestamps)?;

    let columns: Vec<polars::prelude::Column> = vec![
        Series::new(
            Column::Open.name().into(),
            bars.iter().map(|b| b.open).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            Column::High.name().into(),
            bars.iter().map(|b| b.high).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            Column::Low.name().into(),
            bars.iter().map(|b| b.low).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            Column::Close.name().into(),
            bars.iter().map(|b| b.close).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            Column::Volume.name().into(),
            bars.iter().map(|b| b.volume).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            Column::Turnover.name().into(),
            bars.iter().map(|b| b.turnover).collect::<Vec<_>>(),
        )
        .into(),
    ];
    df.hstack_mut(&columns)?;
    Ok(df)
}

/// Convert a frame with the raw bar columns back into bars.
pub fn frame_to_bars(df: &DataFrame) -> Result<Vec<Bar>> {
    require_columns(
        df,
        &[
            Column::Open.name(),
            Column::High.name(),
            Column::Low.name(),
            Column::Close.name(),
        ],
    )?;
    let entity_ids = entity_ids(df)?;
    let timestamps = timestamps(df)?;
    let open = f64_values(df, Column::Open.name())?;
    let high = f64_values(df, Column::High.name())?;
    let low = f64_values(df, Column::Low.name())?;
    let close = f64_values(df, Column::Close.name())?;
    let volume = optional_f64_values(df, Column::Volume.name())?;
    let turnover = optional_f64_values(df, Column::Turnover.name())?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let missing = |field: &str| DataError::MissingData {
            entity_id: entity_ids[i].clone(),
            reason: format!("{} is null at {}", field, format_timestamp(timestamps[i])),
        };
        bars.push(Bar {
            entity_id: entity_ids[i].clone(),
            timestamp: timestamps[i],
            open: open[i].ok_or_else(|| missing("open"))?,
            high: high[i].ok_or_else(|| missing("high"))?,
            low: low[i].ok_or_else(|| missing("low"))?,
            close: close[i].ok_or_else(|| missing("close"))?,
            volume: volume[i],
            turnover: turnover[i],
        });
    }
    Ok(bars)
}

/// Check that every named column is present.
pub fn require_columns(df: &DataFrame, names: &[&str]) -> Result<()> {
    for name in names {
        if df.column(name).is_err() {
            return Err(DataError::MissingColumn((*name).to_string()));
        }
    }
    Ok(())
}

/// Whether the frame has a column with the given name.
pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Entity id of every row.
pub fn entity_ids(df: &DataFrame) -> Result<Vec<String>> {
    let name = Column::EntityId.name();
    let ca = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?
        .str()?;
    ca.into_iter()
        .map(|v| {
            v.map(str::to_string)
                .ok_or_else(|| DataError::Parse("Null entity_id".to_string()))
        })
        .collect()
}

/// Timestamp of every row.
pub fn timestamps(df: &DataFrame) -> Result<Vec<NaiveDateTime>> {
    let name = Column::Timestamp.name();
    let column = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?
        .cast(&DataType::Int64)?;
    column
        .i64()?
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| DataError::Parse("Null timestamp".to_string()))
                .and_then(from_millis)
        })
        .collect()
}

/// Values of a numeric column as `f64`, nulls preserved.
pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?
        .cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

/// Like [`f64_values`], but an absent column reads as all-null.
pub fn optional_f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    if has_column(df, name) {
        f64_values(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

/// Values of a boolean column, nulls preserved.
pub fn bool_values(df: &DataFrame, name: &str) -> Result<Vec<Option<bool>>> {
    let column = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?;
    Ok(column.bool()?.into_iter().collect())
}

/// Contiguous block of rows belonging to one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityGroup {
    /// Entity id
    pub entity_id: String,
    /// First row of the block
    pub offset: usize,
    /// Number of rows in the block
    pub len: usize,
}

impl EntityGroup {
    /// Row range covered by the block.
    pub const fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Split a frame into its entity blocks, in frame order.
///
/// Fails with [`DataError::UnsortedFrame`] when an entity appears in more than one block
/// or when timestamps within a block are not strictly increasing.
pub fn entity_groups(df: &DataFrame) -> Result<Vec<EntityGroup>> {
    let ids = entity_ids(df)?;
    let times = timestamps(df)?;
    let mut groups: Vec<EntityGroup> = Vec::new();

    for (i, id) in ids.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if &group.entity_id == id => {
                if times[i] <= times[i - 1] {
                    return Err(DataError::UnsortedFrame(format!(
                        "{} has non-increasing timestamp {}",
                        id,
                        format_timestamp(times[i])
                    )));
                }
                group.len += 1;
            }
            _ => {
                if groups.iter().any(|g| &g.entity_id == id) {
                    return Err(DataError::UnsortedFrame(format!(
                        "{} appears in more than one block",
                        id
                    )));
                }
                groups.push(EntityGroup {
                    entity_id: id.clone(),
                    offset: i,
                    len: 1,
                });
            }
        }
    }
    Ok(groups)
}

/// Sort rows by `(entity_id, timestamp)`.
pub fn sort_frame(df: &DataFrame) -> Result<DataFrame> {
    if df.height() == 0 {
        return Ok(df.clone());
    }
    Ok(df.sort(
        [Column::EntityId.name(), Column::Timestamp.name()],
        SortMultipleOptions::default().with_maintain_order(true),
    )?)
}

/// Last timestamp of every entity present in the frame.
pub fn last_timestamps(df: &DataFrame) -> Result<HashMap<String, NaiveDateTime>> {
    let times = timestamps(df)?;
    Ok(entity_groups(df)?
        .into_iter()
        .map(|g| {
            let last = times[g.offset + g.len - 1];
            (g.entity_id, last)
        })
        .collect())
}

fn filter_rows(df: &DataFrame, mask: Vec<bool>) -> Result<DataFrame> {
    let mask = BooleanChunked::from_slice("mask".into(), &mask);
    Ok(df.filter(&mask)?)
}

/// Keep the rows of each entity strictly after that entity's cutoff.
///
/// Entities without a cutoff keep every row.
pub fn rows_after(df: &DataFrame, cutoffs: &HashMap<String, NaiveDateTime>) -> Result<DataFrame> {
    let ids = entity_ids(df)?;
    let times = timestamps(df)?;
    let mask = ids
        .iter()
        .zip(&times)
        .map(|(id, ts)| cutoffs.get(id).is_none_or(|cutoff| ts > cutoff))
        .collect();
    filter_rows(df, mask)
}

/// Keep the rows strictly after `cutoff`, for every entity.
pub fn rows_after_timestamp(df: &DataFrame, cutoff: NaiveDateTime) -> Result<DataFrame> {
    let mask = timestamps(df)?.into_iter().map(|ts| ts > cutoff).collect();
    filter_rows(df, mask)
}

/// Rows `offset..offset + len`, clamped to the frame.
pub fn slice_rows(df: &DataFrame, offset: usize, len: usize) -> DataFrame {
    df.slice(offset as i64, len)
}

/// Rows newer than each entity's cutoff, plus up to `lookback` rows before them.
///
/// Entities without a cutoff keep every row.
pub fn lookback_rows(
    df: &DataFrame,
    cutoffs: &HashMap<String, NaiveDateTime>,
    lookback: usize,
) -> Result<DataFrame> {
    let times = timestamps(df)?;
    let mut mask = vec![false; df.height()];
    for group in entity_groups(df)? {
        let range = group.range();
        let first_new = match cutoffs.get(&group.entity_id) {
            Some(cutoff) => times[range.clone()]
                .iter()
                .position(|ts| ts > cutoff)
                .map_or(range.end, |p| range.start + p),
            None => range.start,
        };
        let keep_from = first_new.saturating_sub(lookback).max(range.start);
        for flag in &mut mask[keep_from..range.end] {
            *flag = true;
        }
    }
    filter_rows(df, mask)
}

/// Keep the rows of one entity.
pub fn entity_rows(df: &DataFrame, entity_id: &str) -> Result<DataFrame> {
    let mask = entity_ids(df)?.into_iter().map(|id| id == entity_id).collect();
    filter_rows(df, mask)
}

/// Drop the rows of one entity.
pub fn without_entity(df: &DataFrame, entity_id: &str) -> Result<DataFrame> {
    let mask = entity_ids(df)?.into_iter().map(|id| id != entity_id).collect();
    filter_rows(df, mask)
}

/// Keep at most the last `n` rows of each entity.
pub fn tail_per_entity(df: &DataFrame, n: usize) -> Result<DataFrame> {
    let mut mask = vec![false; df.height()];
    for group in entity_groups(df)? {
        let keep_from = group.offset + group.len.saturating_sub(n);
        for flag in &mut mask[keep_from..group.offset + group.len] {
            *flag = true;
        }
    }
    filter_rows(df, mask)
}

/// Stack `next` under `prev`, aligning columns by name. An empty side yields the other
/// side unchanged.
///
/// Columns of `prev` are cast to the dtype they have in `next`; columns missing on either
/// side are filled with nulls. The result carries `next`'s column order followed by the
/// columns only `prev` has.
pub fn concat_aligned(prev: &DataFrame, next: &DataFrame) -> Result<DataFrame> {
    if prev.height() == 0 {
        return Ok(next.clone());
    }
    if next.height() == 0 {
        return Ok(prev.clone());
    }

    let mut top = Vec::new();
    let mut bottom = Vec::new();
    for column in next.get_columns() {
        let name = column.name().as_str();
        let dtype = column.dtype();
        let aligned = match prev.column(name) {
            Ok(existing) => existing.cast(dtype)?,
            Err(_) => Series::full_null(name.into(), prev.height(), dtype).into(),
        };
        top.push(aligned);
        bottom.push(column.clone());
    }
    for column in prev.get_columns() {
        let name = column.name().as_str();
        if has_column(next, name) {
            continue;
        }
        top.push(column.clone());
        bottom.push(Series::full_null(name.into(), next.height(), column.dtype()).into());
    }

    let mut stacked = DataFrame::new(top)?;
    stacked.vstack_mut(&DataFrame::new(bottom)?)?;
    Ok(stacked)
}

/// One persisted factor row: the key plus a JSON object of indicator values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRecord {
    /// Entity id
    pub entity_id: String,
    /// Row timestamp
    pub timestamp: NaiveDateTime,
    /// Indicator values by column name
    pub values: Map<String, Value>,
}

impl FactorRecord {
    /// Deterministic row id within a factor.
    pub fn id(&self, factor_name: &str) -> String {
        format!(
            "{}_{}_{}",
            factor_name,
            self.entity_id,
            format_timestamp(self.timestamp)
        )
    }
}

fn json_f64(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Convert a frame into records. Every non-key column becomes a JSON value.
pub fn frame_to_records(df: &DataFrame) -> Result<Vec<FactorRecord>> {
    let ids = entity_ids(df)?;
    let times = timestamps(df)?;
    let mut records: Vec<FactorRecord> = ids
        .into_iter()
        .zip(times)
        .map(|(entity_id, timestamp)| FactorRecord {
            entity_id,
            timestamp,
            values: Map::new(),
        })
        .collect();

    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == Column::EntityId.name() || name == Column::Timestamp.name() {
            continue;
        }
        let values: Vec<Value> = match column.dtype() {
            DataType::Boolean => column
                .bool()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Bool))
                .collect(),
            DataType::String => column
                .str()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
                .collect(),
            dtype if dtype.is_integer() => column
                .cast(&DataType::Int64)?
                .i64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::from))
                .collect(),
            dtype if dtype.is_float() => column
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, json_f64))
                .collect(),
            _ => column
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
                .collect(),
        };
        for (record, value) in records.iter_mut().zip(values) {
            record.values.insert(name.to_string(), value);
        }
    }
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
}

impl JsonKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_f64() => Self::Float,
            Value::Number(_) => Self::Int,
            _ => Self::Str,
        }
    }

    const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Null, k) | (k, Self::Null) => k,
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => Self::Float,
            (a, b) if a as u8 == b as u8 => a,
            _ => Self::Str,
        }
    }
}

/// Convert records back into a frame. Value columns are typed from their JSON values:
/// booleans, integers, floats or strings; an all-null column reads as `Float64`.
pub fn records_to_frame(records: &[FactorRecord]) -> Result<DataFrame> {
    let ids: Vec<String> = records.iter().map(|r| r.entity_id.clone()).collect();
    let times: Vec<NaiveDateTime> = records.iter().map(|r| r.timestamp).collect();
    let mut df = key_frame(&ids, &times)?;

    let mut names: Vec<&String> = Vec::new();
    for record in records {
        for name in record.values.keys() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    let mut columns: Vec<polars::prelude::Column> = Vec::with_capacity(names.len());
    for name in names {
        let cells: Vec<&Value> = records
            .iter()
            .map(|r| r.values.get(name).unwrap_or(&Value::Null))
            .collect();
        let kind = cells
            .iter()
            .fold(JsonKind::Null, |acc, v| acc.merge(JsonKind::of(v)));
        let series = match kind {
            JsonKind::Bool => Series::new(
                name.as_str().into(),
                cells.iter().map(|v| v.as_bool()).collect::<Vec<_>>(),
            ),
            JsonKind::Int => Series::new(
                name.as_str().into(),
                cells.iter().map(|v| v.as_i64()).collect::<Vec<_>>(),
            ),
            JsonKind::Float | JsonKind::Null => Series::new(
                name.as_str().into(),
                cells.iter().map(|v| v.as_f64()).collect::<Vec<_>>(),
            ),
            JsonKind::Str => Series::new(
                name.as_str().into(),
                cells
                    .iter()
                    .map(|v| match v {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect::<Vec<_>>(),
            ),
        };
        columns.push(series.into());
    }
    df.hstack_mut(&columns)?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_timestamp;
    use approx::assert_relative_eq;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn sample_bars() -> Vec<Bar> {
        vec![
            Bar::new("stock_sz_000001", ts("2024-01-02"), 10.0, 11.0, 9.5, 10.5).with_volume(100.0),
            Bar::new("stock_sz_000001", ts("2024-01-03"), 10.5, 12.0, 10.0, 11.5),
            Bar::new("stock_sz_000002", ts("2024-01-02"), 20.0, 21.0, 19.0, 20.5),
        ]
    }

    #[test]
    fn test_bars_frame_round_trip() {
        let bars = sample_bars();
        let df = bars_to_frame(&bars).unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.column("timestamp").unwrap().dtype(), &timestamp_dtype());

        let back = frame_to_bars(&df).unwrap();
        assert_eq!(back, bars);
    }

    #[test]
    fn test_entity_groups() {
        let df = bars_to_frame(&sample_bars()).unwrap();
        let groups = entity_groups(&df).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].entity_id, "stock_sz_000001");
        assert_eq!(groups[0].range(), 0..2);
        assert_eq!(groups[1].range(), 2..3);
    }

    #[test]
    fn test_entity_groups_rejects_interleaved_entities() {
        let mut bars = sample_bars();
        bars.push(Bar::new("stock_sz_000001", ts("2024-01-04"), 1.0, 1.0, 1.0, 1.0));
        let df = bars_to_frame(&bars).unwrap();
        assert!(matches!(entity_groups(&df), Err(DataError::UnsortedFrame(_))));

        let sorted = sort_frame(&df).unwrap();
        assert_eq!(entity_groups(&sorted).unwrap().len(), 2);
    }

    #[test]
    fn test_entity_groups_rejects_duplicate_timestamps() {
        let mut bars = sample_bars();
        bars.insert(1, bars[0].clone());
        let df = bars_to_frame(&bars).unwrap();
        assert!(matches!(entity_groups(&df), Err(DataError::UnsortedFrame(_))));
    }

    #[test]
    fn test_rows_after_and_tail() {
        let df = bars_to_frame(&sample_bars()).unwrap();
        let cutoffs = HashMap::from([("stock_sz_000001".to_string(), ts("2024-01-02"))]);
        let newer = rows_after(&df, &cutoffs).unwrap();
        assert_eq!(newer.height(), 2);
        assert_eq!(timestamps(&newer).unwrap()[0], ts("2024-01-03"));

        let tail = tail_per_entity(&df, 1).unwrap();
        assert_eq!(tail.height(), 2);
        assert_eq!(
            entity_ids(&tail).unwrap(),
            vec!["stock_sz_000001".to_string(), "stock_sz_000002".to_string()]
        );
        assert_eq!(last_timestamps(&df).unwrap()["stock_sz_000001"], ts("2024-01-03"));
    }

    #[test]
    fn test_lookback_rows() {
        let mut bars = sample_bars();
        bars.insert(2, Bar::new("stock_sz_000001", ts("2024-01-04"), 1.0, 1.0, 1.0, 1.0));
        let df = bars_to_frame(&bars).unwrap();
        let cutoffs = HashMap::from([("stock_sz_000001".to_string(), ts("2024-01-03"))]);

        let window = lookback_rows(&df, &cutoffs, 1).unwrap();
        assert_eq!(window.height(), 3);
        assert_eq!(timestamps(&window).unwrap()[0], ts("2024-01-03"));

        let none_new = HashMap::from([("stock_sz_000001".to_string(), ts("2024-01-04"))]);
        let window = lookback_rows(&df, &none_new, 0).unwrap();
        assert_eq!(entity_ids(&window).unwrap(), vec!["stock_sz_000002".to_string()]);
    }

    #[test]
    fn test_concat_aligned_fills_missing_columns() {
        let prev = bars_to_frame(&sample_bars()[..1]).unwrap();
        let mut next = bars_to_frame(&sample_bars()[1..2]).unwrap();
        next.with_column(Series::new("ma2".into(), vec![Some(11.0)])).unwrap();

        let all = concat_aligned(&prev, &next).unwrap();
        assert_eq!(all.height(), 2);
        assert_eq!(f64_values(&all, "ma2").unwrap(), vec![None, Some(11.0)]);
        assert_eq!(f64_values(&all, "close").unwrap(), vec![Some(10.5), Some(11.5)]);
    }

    #[test]
    fn test_records_round_trip() {
        let mut df = bars_to_frame(&sample_bars()).unwrap();
        df.with_column(Series::new("flag".into(), vec![Some(true), None, Some(false)]))
            .unwrap();
        df.with_column(Series::new("count".into(), vec![Some(1i64), Some(2), None]))
            .unwrap();
        df.with_column(Series::new("state".into(), vec![Some("up"), None, Some("down")]))
            .unwrap();

        let records = frame_to_records(&df).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id("ma"), "ma_stock_sz_000001_2024-01-02 00:00:00");
        assert_eq!(records[1].values["volume"], Value::Null);

        let back = records_to_frame(&records).unwrap();
        assert_eq!(back.height(), 3);
        assert_eq!(bool_values(&back, "flag").unwrap(), vec![Some(true), None, Some(false)]);
        assert_eq!(back.column("count").unwrap().dtype(), &DataType::Int64);
        assert_eq!(back.column("state").unwrap().dtype(), &DataType::String);
        assert_relative_eq!(f64_values(&back, "close").unwrap()[2].unwrap(), 20.5);
        assert_eq!(timestamps(&back).unwrap(), timestamps(&df).unwrap());
    }
}
