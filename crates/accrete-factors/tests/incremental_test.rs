//! Persisted, resumed computations reproduce a single run over the whole history.

use accrete_data::frame::{entity_ids, timestamps};
use accrete_data::model::parse_timestamp;
use accrete_data::{
    Bar, Column, DataError, OnConflict, SqliteStore, StoreStats, TimeSeriesStore,
};
use accrete_factors::zen::ZenColumn;
use accrete_factors::{FILTER_RESULT, Factor, FactorConfig, FactorError, FactorRegistry};
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

const A: &str = "stock_sz_000001";
const B: &str = "stock_sz_000002";

fn random_walk(entity_id: &str, n: usize, seed: u64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = parse_timestamp("2024-01-01").unwrap();
    let mut close = 10.0;
    (0..n)
        .map(|i| {
            let open = close;
            close = (close + rng.gen_range(-0.5..0.5_f64)).max(1.0);
            let high = open.max(close) + rng.gen_range(0.0..0.3);
            let low = (open.min(close) - rng.gen_range(0.0..0.3)).max(0.5);
            Bar::new(entity_id, start + Duration::days(i as i64), open, high, low, close)
        })
        .collect()
}

fn persisting() -> FactorConfig {
    FactorConfig {
        need_persist: true,
        ..FactorConfig::default()
    }
}

fn run(
    registry: &FactorRegistry,
    name: &str,
    store: Rc<dyn TimeSeriesStore>,
    config: FactorConfig,
) -> Factor {
    let mut factor = registry.create(name, store, config).unwrap();
    let report = factor.compute().unwrap();
    assert!(report.is_success(), "{report}");
    factor
}

/// Compare two frames column by column, casting `actual` to the dtypes of `expected`.
fn assert_same_rows(actual: &DataFrame, expected: &DataFrame, columns: &[&str]) {
    assert_eq!(actual.height(), expected.height());
    assert_eq!(entity_ids(actual).unwrap(), entity_ids(expected).unwrap());
    assert_eq!(timestamps(actual).unwrap(), timestamps(expected).unwrap());

    for name in columns {
        let want = expected.column(name).unwrap();
        let got = actual.column(name).unwrap().cast(want.dtype()).unwrap();
        if want.dtype() == &DataType::Float64 {
            let want: Vec<Option<f64>> = want.f64().unwrap().into_iter().collect();
            let got: Vec<Option<f64>> = got.f64().unwrap().into_iter().collect();
            for (row, (g, w)) in got.iter().zip(&want).enumerate() {
                match (g, w) {
                    (Some(g), Some(w)) => {
                        assert!((g - w).abs() < 1e-9, "{name} row {row}: {g} != {w}")
                    }
                    _ => assert_eq!(g, w, "{name} row {row}"),
                }
            }
        } else {
            assert!(
                got.as_materialized_series()
                    .equals_missing(want.as_materialized_series()),
                "{name} differs"
            );
        }
    }
}

#[rstest]
#[case(1, 40)]
#[case(7, 25)]
#[case(42, 59)]
fn test_persisted_zen_matches_cold_run(#[case] seed: u64, #[case] split: usize) {
    let registry = FactorRegistry::with_defaults();
    let bars = random_walk(A, 60, seed);

    let warm_store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    warm_store.upsert_bars(&bars[..split]).unwrap();
    run(&registry, "zen", warm_store.clone(), persisting());

    warm_store.upsert_bars(&bars[split..]).unwrap();
    let warm = run(&registry, "zen", warm_store.clone(), persisting());

    let cold_store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    cold_store.upsert_bars(&bars).unwrap();
    let cold = run(&registry, "zen", cold_store, FactorConfig::default());

    let columns: Vec<&str> = ZenColumn::ALL.iter().map(|c| c.name()).collect();
    assert_same_rows(warm.factor_df(), cold.factor_df(), &columns);
    assert_same_rows(warm.result_df(), cold.result_df(), &[FILTER_RESULT]);
    assert_eq!(warm.state(A), cold.state(A));
    assert_eq!(warm_store.stats().unwrap().factor_rows, 60);
}

#[test]
fn test_ma_stats_resumed_in_batches() {
    let registry = FactorRegistry::with_defaults();
    let a = random_walk(A, 60, 3);
    let b = random_walk(B, 60, 4);

    let store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    let mut factor = None;
    for end in [15, 30, 45, 60] {
        store.upsert_bars(&a[end - 15..end]).unwrap();
        store.upsert_bars(&b[end - 15..end]).unwrap();
        factor = Some(run(&registry, "ma_stats", store.clone(), persisting()));
    }
    let warm = factor.unwrap();

    let cold_store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    cold_store.upsert_bars(&a).unwrap();
    cold_store.upsert_bars(&b).unwrap();
    let cold = run(&registry, "ma_stats", cold_store, FactorConfig::default());

    assert_same_rows(
        warm.factor_df(),
        cold.factor_df(),
        &["ma5", "ma10", "live", "live_count", "distance", "area"],
    );
    assert_eq!(warm.state(B), cold.state(B));
    assert_eq!(store.stats().unwrap().factor_rows, 120);
}

#[test]
fn test_transformer_factor_persists_only_new_rows() {
    let registry = FactorRegistry::with_defaults();
    let bars = random_walk(A, 50, 11);
    let store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());

    store.upsert_bars(&bars[..45]).unwrap();
    run(&registry, "bull", store.clone(), persisting());
    store.upsert_bars(&bars[45..]).unwrap();
    let warm = run(&registry, "bull", store.clone(), persisting());

    assert_eq!(warm.factor_df().height(), 50);
    assert_eq!(store.stats().unwrap().factor_rows, 50);
    // transformers carry no state
    assert_eq!(store.stats().unwrap().factor_states, 0);
}

/// Store whose factor-row writes fail for one entity while `failing` is set.
#[derive(Debug)]
struct FailingStore {
    inner: SqliteStore,
    entity_id: String,
    failing: Cell<bool>,
}

impl TimeSeriesStore for FailingStore {
    fn query_time_series(
        &self,
        entity_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        columns: &[Column],
    ) -> accrete_data::Result<DataFrame> {
        self.inner.query_time_series(entity_ids, start, end, columns)
    }

    fn query_factor_result(
        &self,
        factor_name: &str,
        entity_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> accrete_data::Result<DataFrame> {
        self.inner.query_factor_result(factor_name, entity_ids, start, end)
    }

    fn query_factor_state(
        &self,
        factor_name: &str,
        entity_ids: &[String],
    ) -> accrete_data::Result<HashMap<String, String>> {
        self.inner.query_factor_state(factor_name, entity_ids)
    }

    fn upsert_bars(&self, bars: &[Bar]) -> accrete_data::Result<usize> {
        self.inner.upsert_bars(bars)
    }

    fn upsert_factor_result(
        &self,
        factor_name: &str,
        rows: &DataFrame,
        on_conflict: OnConflict,
    ) -> accrete_data::Result<usize> {
        if self.failing.get() && entity_ids(rows)?.contains(&self.entity_id) {
            return Err(DataError::Parse("disk full".to_string()));
        }
        self.inner.upsert_factor_result(factor_name, rows, on_conflict)
    }

    fn upsert_factor_state(
        &self,
        factor_name: &str,
        entity_id: &str,
        state: &str,
    ) -> accrete_data::Result<()> {
        self.inner.upsert_factor_state(factor_name, entity_id, state)
    }

    fn delete_state(&self, factor_name: &str, entity_id: &str) -> accrete_data::Result<()> {
        self.inner.delete_state(factor_name, entity_id)
    }

    fn delete_result(&self, factor_name: &str, entity_id: &str) -> accrete_data::Result<()> {
        self.inner.delete_result(factor_name, entity_id)
    }

    fn entity_ids(&self) -> accrete_data::Result<Vec<String>> {
        self.inner.entity_ids()
    }

    fn latest_timestamp(&self, entity_id: &str) -> accrete_data::Result<Option<NaiveDateTime>> {
        self.inner.latest_timestamp(entity_id)
    }

    fn stats(&self) -> accrete_data::Result<StoreStats> {
        self.inner.stats()
    }
}

#[test]
fn test_persistence_failure_rolls_back_one_entity() {
    let registry = FactorRegistry::with_defaults();
    let store = Rc::new(FailingStore {
        inner: SqliteStore::in_memory().unwrap(),
        entity_id: B.to_string(),
        failing: Cell::new(true),
    });
    store.upsert_bars(&random_walk(A, 30, 5)).unwrap();
    store.upsert_bars(&random_walk(B, 30, 6)).unwrap();

    let mut factor = registry.create("ma_stats", store.clone(), persisting()).unwrap();
    let report = factor.compute().unwrap();
    assert_eq!(report.computed, vec![A.to_string()]);
    assert!(report.has_failed(B));
    assert!(matches!(
        store.stats().unwrap(),
        StoreStats {
            factor_rows: 30,
            factor_states: 1,
            ..
        }
    ));
    // in memory the entity is back to what is on disk
    assert!(factor.state(B).is_none());
    assert!(!entity_ids(factor.factor_df()).unwrap().contains(&B.to_string()));

    store.failing.set(false);
    let report = factor.compute().unwrap();
    assert!(report.is_success());
    assert_eq!(report.computed, vec![B.to_string()]);
    assert_eq!(store.stats().unwrap().factor_rows, 60);
    assert_eq!(store.stats().unwrap().factor_states, 2);
}

#[rstest]
#[case::oversized_window(r#"{"closes":[1,2,3,4,5,6,7,8,9,10,11,12]}"#)]
#[case::wrong_shape(r#"{"closes":"none"}"#)]
#[case::not_json("not json")]
fn test_corrupted_state_restarts_cold(#[case] corrupted: &str) {
    let registry = FactorRegistry::with_defaults();
    let bars = random_walk(A, 25, 9);
    let store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    store.upsert_bars(&bars[..20]).unwrap();
    run(&registry, "ma_stats", store.clone(), persisting());

    store.upsert_factor_state("ma_stats", A, corrupted).unwrap();
    store.upsert_bars(&bars[20..]).unwrap();
    let mut factor = registry.create("ma_stats", store.clone(), persisting()).unwrap();
    let report = factor.compute().unwrap();
    assert_eq!(report.restarted, vec![A.to_string()]);
    assert!(report.is_success());

    let cold_store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    cold_store.upsert_bars(&bars).unwrap();
    let cold = run(&registry, "ma_stats", cold_store, FactorConfig::default());
    assert_same_rows(factor.factor_df(), cold.factor_df(), &["ma5", "ma10", "live_count", "area"]);
    assert_eq!(factor.state(A), cold.state(A));

    let persisted = store.query_factor_state("ma_stats", &[A.to_string()]).unwrap();
    assert_eq!(persisted[A], cold.state(A).unwrap().encode().unwrap());
    assert_eq!(store.stats().unwrap().factor_rows, 25);
}

#[test]
fn test_dry_run_writes_nothing() {
    let registry = FactorRegistry::with_defaults();
    let store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    store.upsert_bars(&random_walk(A, 30, 2)).unwrap();

    let config = FactorConfig {
        dry_run: true,
        clear_state: true,
        ..FactorConfig::default()
    };
    let factor = run(&registry, "zen", store.clone(), config);
    assert_eq!(factor.factor_df().height(), 30);
    assert_eq!(store.stats().unwrap().factor_rows, 0);
    assert_eq!(store.stats().unwrap().factor_states, 0);
}

#[test]
fn test_unknown_factor() {
    let registry = FactorRegistry::with_defaults();
    let store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory().unwrap());
    assert!(matches!(
        registry.create("nope", store, FactorConfig::default()),
        Err(FactorError::NotFound(_))
    ));
}
