//! Ready-made technical factors.
//!
//! Each constructor wires a [`Factor`] with a transformer or accumulator and a way of
//! deriving its result. They are the default entries of the
//! [`FactorRegistry`](crate::registry::FactorRegistry).

use crate::accumulator::MaStatsAccumulator;
use crate::error::Result;
use crate::factor::{Factor, FactorConfig};
use crate::scorer::RankScorer;
use crate::signal::{CloseAboveMas, MaAligned, MacdBull, MaLive, ZenUptrend};
use crate::transformer::ma::CHANGE_PCT;
use crate::transformer::{MaConfig, MaTransformer, MacdConfig, MacdTransformer};
use crate::zen::ZenAccumulator;
use accrete_data::TimeSeriesStore;
use std::rc::Rc;

/// Windows of the `ma` factor.
pub const MA_WINDOWS: [usize; 3] = [5, 10, 34];

/// Windows of the `cross_ma` factor.
pub const CROSS_MA_WINDOWS: [usize; 2] = [5, 10];

/// Moving averages of the close; selects closes above all of them.
pub fn ma(store: Rc<dyn TimeSeriesStore>, config: FactorConfig) -> Result<Factor> {
    Ok(Factor::new("ma", store, config)?
        .with_transformer(MaTransformer::with_windows(&MA_WINDOWS))
        .with_signal(CloseAboveMas {
            windows: MA_WINDOWS.to_vec(),
        }))
}

/// Short and long moving averages; selects rows where the short one is on top.
pub fn cross_ma(store: Rc<dyn TimeSeriesStore>, config: FactorConfig) -> Result<Factor> {
    Ok(Factor::new("cross_ma", store, config)?
        .with_transformer(MaTransformer::with_windows(&CROSS_MA_WINDOWS))
        .with_signal(MaAligned {
            windows: CROSS_MA_WINDOWS.to_vec(),
        }))
}

fn macd_transformer() -> MacdTransformer {
    MacdTransformer::with_config(MacdConfig {
        count_live_dead: true,
        ..MacdConfig::default()
    })
}

/// MACD with golden/dead-cross run lengths.
pub fn macd(store: Rc<dyn TimeSeriesStore>, config: FactorConfig) -> Result<Factor> {
    Ok(Factor::new("macd", store, config)?.with_transformer(macd_transformer()))
}

/// MACD; selects rows in a bullish regime.
pub fn bull(store: Rc<dyn TimeSeriesStore>, config: FactorConfig) -> Result<Factor> {
    Ok(Factor::new("bull", store, config)?
        .with_transformer(macd_transformer())
        .with_signal(MacdBull))
}

/// Chan-analysis structure; selects rows inside an up segment.
pub fn zen(store: Rc<dyn TimeSeriesStore>, config: FactorConfig) -> Result<Factor> {
    Ok(Factor::new("zen", store, config)?
        .with_accumulator(ZenAccumulator::default())
        .with_signal(ZenUptrend))
}

/// Incremental moving-average statistics; selects rows where the short average leads.
pub fn ma_stats(store: Rc<dyn TimeSeriesStore>, config: FactorConfig) -> Result<Factor> {
    Ok(Factor::new("ma_stats", store, config)?
        .with_accumulator(MaStatsAccumulator::default())
        .with_signal(MaLive))
}

/// Cross-sectional rank of the daily change.
pub fn change_pct_rank(store: Rc<dyn TimeSeriesStore>, config: FactorConfig) -> Result<Factor> {
    let transformer = MaTransformer::with_config(MaConfig {
        windows: Vec::new(),
        cal_change_pct: true,
        ..MaConfig::default()
    });
    Ok(Factor::new("change_pct_rank", store, config)?
        .with_transformer(transformer)
        .with_scorer(RankScorer::new([CHANGE_PCT], true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FactorKind, FactorRegistry};
    use crate::scorer::SCORE_RESULT;
    use crate::signal::FILTER_RESULT;
    use accrete_data::frame::has_column;
    use accrete_data::model::parse_timestamp;
    use accrete_data::{Bar, SqliteStore};
    use chrono::Duration;

    fn store() -> Rc<dyn TimeSeriesStore> {
        let store = SqliteStore::in_memory().unwrap();
        let start = parse_timestamp("2024-01-01").unwrap();
        for (entity_id, phase) in [("stock_sz_000001", 0.0), ("stock_sz_000002", 1.3)] {
            let bars: Vec<Bar> = (0..60)
                .map(|i| {
                    let close = 20.0 + (i as f64 / 3.0 + phase).sin() * 3.0;
                    let ts = start + Duration::days(i);
                    Bar::new(entity_id, ts, close, close + 0.4, close - 0.4, close)
                })
                .collect();
            store.upsert_bars(&bars).unwrap();
        }
        Rc::new(store)
    }

    #[test]
    fn test_every_default_factor_computes() {
        let store = store();
        let registry = FactorRegistry::with_defaults();
        for info in registry.infos() {
            let mut factor = registry
                .create(info.name, store.clone(), FactorConfig::default())
                .unwrap();
            let report = factor.compute().unwrap();
            assert!(report.is_success(), "{}: {}", info.name, report);
            assert_eq!(report.computed.len(), 2, "{}", info.name);

            let result = factor.result_df();
            assert_eq!(result.height(), 120, "{}", info.name);
            match info.kind {
                FactorKind::Filter => assert!(has_column(result, FILTER_RESULT), "{}", info.name),
                FactorKind::Score => assert!(has_column(result, SCORE_RESULT), "{}", info.name),
                FactorKind::Indicator => assert!(has_column(result, "diff"), "{}", info.name),
            }
        }
    }

    #[test]
    fn test_ma_windows() {
        let mut factor = ma(store(), FactorConfig::for_entities(["stock_sz_000002"])).unwrap();
        factor.compute().unwrap();
        for window in MA_WINDOWS {
            assert!(has_column(factor.factor_df(), &format!("ma{}", window)));
        }
    }
}
