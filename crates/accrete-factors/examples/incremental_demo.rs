//! Demonstration of incremental factor computation
//!
//! This example shows how to:
//! - List the registered factors
//! - Compute a stateful factor over an in-memory store
//! - Resume it when new bars arrive, and check it against a full recomputation
//!
//! Run with: cargo run --example incremental_demo -p accrete-factors

use accrete_data::model::parse_timestamp;
use accrete_data::{Bar, SqliteStore, TimeSeriesStore};
use accrete_factors::{FactorConfig, FactorKind, FactorRegistry};
use chrono::Duration;
use std::rc::Rc;

const ENTITY: &str = "stock_sz_000001";

fn bars(from: usize, to: usize) -> Vec<Bar> {
    let start = parse_timestamp("2024-01-01").expect("valid timestamp");
    (from..to)
        .map(|i| {
            let close = 10.0 + (i as f64 / 4.0).sin() * 1.5 + i as f64 * 0.02;
            Bar::new(
                ENTITY,
                start + Duration::days(i as i64),
                close,
                close + 0.2,
                close - 0.2,
                close,
            )
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("accrete Incremental Factor Demo");
    println!("===============================\n");

    let registry = FactorRegistry::with_defaults();
    println!("Registered factors:");
    for kind in [FactorKind::Filter, FactorKind::Score, FactorKind::Indicator] {
        for info in registry.by_kind(kind) {
            println!("  {:16} {:10} {}", info.name, kind.to_string(), info.description);
        }
    }
    println!();

    let store: Rc<dyn TimeSeriesStore> = Rc::new(SqliteStore::in_memory()?);
    store.upsert_bars(&bars(0, 80))?;

    let config = FactorConfig {
        need_persist: true,
        ..FactorConfig::for_entities([ENTITY])
    };

    let mut factor = registry.create("zen", store.clone(), config.clone())?;
    let report = factor.compute()?;
    println!("First run over 80 bars:\n{}\n", report);

    // a later process picks up where the first one stopped
    store.upsert_bars(&bars(80, 100))?;
    let mut resumed = registry.create("zen", store.clone(), config)?;
    let report = resumed.compute()?;
    println!("Resumed run over 20 new bars:\n{}\n", report);

    let mut full = registry.create("zen", store, FactorConfig::for_entities([ENTITY]))?;
    full.compute()?;
    println!(
        "Same state as a full recomputation: {}",
        resumed.state(ENTITY) == full.state(ENTITY)
    );
    println!("\nLast rows:\n{}", resumed.result_df().tail(Some(5)));

    Ok(())
}
