//! Calendar gap filling.

use crate::error::Result;
use accrete_data::Column;
use accrete_data::frame::{entity_ids, key_frame, timestamps};
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeMap;

const ROW: &str = "__row";

/// Daily calendar keys of every entity, from its first row to `end`.
fn calendar(df: &DataFrame, end: Option<NaiveDateTime>) -> Result<Option<DataFrame>> {
    let ids = entity_ids(df)?;
    let times = timestamps(df)?;
    let Some(end) = end.or_else(|| times.iter().max().copied()) else {
        return Ok(None);
    };

    let mut first: BTreeMap<&str, NaiveDateTime> = BTreeMap::new();
    for (id, ts) in ids.iter().zip(&times) {
        first
            .entry(id.as_str())
            .and_modify(|t| *t = (*t).min(*ts))
            .or_insert(*ts);
    }

    let mut cal_ids = Vec::new();
    let mut cal_times = Vec::new();
    for (id, mut day) in first {
        while day <= end {
            cal_ids.push(id.to_string());
            cal_times.push(day);
            day += Duration::days(1);
        }
    }
    Ok(Some(key_frame(&cal_ids, &cal_times)?))
}

/// Forward-fill every entity over a daily calendar running from its first row to `end`
/// (default: the newest timestamp of the frame).
///
/// Calendar days without a row repeat the last known row, at most `limit` times in a row;
/// days past the limit are left out. Existing rows and the column types are kept as they
/// are.
pub fn fill_gap(
    df: &DataFrame,
    end: Option<NaiveDateTime>,
    limit: Option<usize>,
) -> Result<DataFrame> {
    if df.height() == 0 {
        return Ok(df.clone());
    }
    let Some(calendar) = calendar(df, end)? else {
        return Ok(df.clone());
    };

    let entity = Column::EntityId.name();
    let ts = Column::Timestamp.name();
    let ts_dtype = df.column(ts)?.dtype().clone();
    let rows = df.clone().lazy().with_row_index(ROW, None);

    let keys = concat(
        [
            rows.clone().select([col(entity), col(ts)]),
            calendar
                .lazy()
                .select([col(entity), col(ts).cast(ts_dtype)]),
        ],
        UnionArgs::default(),
    )?
    .unique_stable(None, UniqueKeepStrategy::First)
    .join(
        rows.clone().select([col(entity), col(ts), col(ROW)]),
        [col(entity), col(ts)],
        [col(entity), col(ts)],
        JoinArgs::new(JoinType::Left),
    )
    .sort([entity, ts], SortMultipleOptions::default())
    .collect()?;

    // every entity block opens with one of its own rows, so the fill never crosses
    // entities
    let limit = limit.map(|n| n as IdxSize);
    let source = keys
        .column(ROW)?
        .as_materialized_series()
        .fill_null(FillNullStrategy::Forward(limit))?;
    let mut keys = keys;
    keys.with_column(source)?;

    let values: Vec<Expr> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.as_str())
        .filter(|name| *name != entity && *name != ts)
        .map(col)
        .chain([col(ROW)])
        .collect();
    let order: Vec<Expr> = df
        .get_column_names()
        .into_iter()
        .map(|name| col(name.as_str()))
        .collect();

    let filled = keys
        .lazy()
        .filter(col(ROW).is_not_null())
        .select([col(entity), col(ts), col(ROW)])
        .join(
            rows.select(values),
            [col(ROW)],
            [col(ROW)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([entity, ts], SortMultipleOptions::default())
        .select(order)
        .collect()?;
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accrete_data::frame::{bool_values, f64_values};
    use accrete_data::model::parse_timestamp;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn sample() -> DataFrame {
        let ids: Vec<String> = ["a", "a", "b"].iter().map(|s| s.to_string()).collect();
        let times = [ts("2024-01-01"), ts("2024-01-05"), ts("2024-01-02")];
        let mut df = key_frame(&ids, &times).unwrap();
        df.with_column(Series::new("ma5".into(), vec![Some(1.0), Some(5.0), Some(2.0)]))
            .unwrap();
        df
    }

    #[test]
    fn test_forward_fill() {
        let out = fill_gap(&sample(), None, None).unwrap();
        // a: 01..05, b: 02..05
        assert_eq!(out.height(), 9);
        let ma = f64_values(&out, "ma5").unwrap();
        assert_eq!(&ma[..5], &[Some(1.0), Some(1.0), Some(1.0), Some(1.0), Some(5.0)]);
        assert_eq!(&ma[5..], &[Some(2.0); 4]);
        assert_eq!(timestamps(&out).unwrap()[8], ts("2024-01-05"));
    }

    #[test]
    fn test_fill_limit() {
        let out = fill_gap(&sample(), Some(ts("2024-01-03")), Some(1)).unwrap();
        let ids = entity_ids(&out).unwrap();
        let times = timestamps(&out).unwrap();
        let rows: Vec<(String, NaiveDateTime)> = ids.into_iter().zip(times).collect();
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), ts("2024-01-01")),
                ("a".to_string(), ts("2024-01-02")),
                ("a".to_string(), ts("2024-01-05")),
                ("b".to_string(), ts("2024-01-02")),
                ("b".to_string(), ts("2024-01-03")),
            ]
        );
    }

    #[test]
    fn test_fill_keeps_column_types() {
        let mut df = sample();
        df.with_column(Series::new(
            "filter_result".into(),
            vec![None::<bool>, None, None],
        ))
        .unwrap();
        df.with_column(Series::new("distance".into(), vec![f64::NAN, 0.5, 1.5]))
            .unwrap();
        df.with_column(Series::new("live_count".into(), vec![Some(3i64), None, Some(-2)]))
            .unwrap();

        let out = fill_gap(&df, None, None).unwrap();
        assert_eq!(out.get_column_names(), df.get_column_names());
        for name in ["filter_result", "distance", "live_count", "timestamp"] {
            assert_eq!(
                out.column(name).unwrap().dtype(),
                df.column(name).unwrap().dtype(),
                "{}",
                name
            );
        }

        assert_eq!(bool_values(&out, "filter_result").unwrap(), vec![None; 9]);
        let distance = f64_values(&out, "distance").unwrap();
        // a's first row and its copies keep the NaN
        assert!(distance[..4].iter().all(|d| d.is_some_and(f64::is_nan)));
        assert_eq!(distance[4], Some(0.5));
        let live: Vec<Option<i64>> = out
            .column("live_count")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(&live[..5], &[Some(3), Some(3), Some(3), Some(3), None]);
        assert_eq!(&live[5..], &[Some(-2); 4]);
    }
}
