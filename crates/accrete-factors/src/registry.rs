//! Factor Registry
//!
//! Maps factor names to metadata and a factory. A registry is an ordinary value owned
//! by whoever wires up a run; [`FactorRegistry::with_defaults`] holds the built-in
//! technical factors.

use crate::error::{FactorError, Result};
use crate::factor::{Factor, FactorConfig};
use crate::technical;
use accrete_data::{Column, TimeSeriesStore};
use derive_more::Display;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// What a factor's result is.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    /// Boolean `filter_result` per row
    #[display("filter")]
    Filter,
    /// Numeric `score_result` per row
    #[display("score")]
    Score,
    /// Indicator columns only
    #[display("indicator")]
    Indicator,
}

/// Factor metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactorInfo {
    /// Factor name (unique identifier)
    pub name: &'static str,
    /// Result kind
    pub kind: FactorKind,
    /// Brief description of what the factor computes
    pub description: &'static str,
    /// Raw columns read from the store
    pub required_columns: &'static [Column],
    /// Whether the factor carries accumulator state between runs
    pub stateful: bool,
}

/// Builds a factor over a store.
pub type FactorFactory = fn(Rc<dyn TimeSeriesStore>, FactorConfig) -> Result<Factor>;

#[derive(Clone)]
struct Entry {
    info: FactorInfo,
    factory: FactorFactory,
}

/// Name → metadata and factory.
#[derive(Clone, Default)]
pub struct FactorRegistry {
    entries: BTreeMap<&'static str, Entry>,
}

impl fmt::Debug for FactorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorRegistry")
            .field("factors", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FactorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in technical factors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (info, factory) in default_factors() {
            registry.register(info, factory);
        }
        registry
    }

    /// Register a factor, replacing any factor of the same name.
    pub fn register(&mut self, info: FactorInfo, factory: FactorFactory) {
        self.entries.insert(info.name, Entry { info, factory });
    }

    /// Metadata of one factor.
    pub fn get(&self, name: &str) -> Option<&FactorInfo> {
        self.entries.get(name).map(|e| &e.info)
    }

    /// Whether a factor is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Metadata of every factor, sorted by name.
    pub fn infos(&self) -> Vec<&FactorInfo> {
        self.entries.values().map(|e| &e.info).collect()
    }

    /// Factors of one kind, sorted by name.
    pub fn by_kind(&self, kind: FactorKind) -> Vec<&FactorInfo> {
        self.infos().into_iter().filter(|i| i.kind == kind).collect()
    }

    /// Number of registered factors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a registered factor.
    pub fn create(
        &self,
        name: &str,
        store: Rc<dyn TimeSeriesStore>,
        config: FactorConfig,
    ) -> Result<Factor> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| FactorError::NotFound(name.to_string()))?;
        (entry.factory)(store, config)
    }
}

const CLOSE: &[Column] = &[Column::Close];
const HIGH_LOW_CLOSE: &[Column] = &[Column::High, Column::Low, Column::Close];

fn default_factors() -> Vec<(FactorInfo, FactorFactory)> {
    vec![
        (
            FactorInfo {
                name: "ma",
                kind: FactorKind::Filter,
                description: "Close above its 5, 10 and 34 bar moving averages",
                required_columns: CLOSE,
                stateful: false,
            },
            technical::ma,
        ),
        (
            FactorInfo {
                name: "cross_ma",
                kind: FactorKind::Filter,
                description: "5 bar moving average above the 10 bar one",
                required_columns: CLOSE,
                stateful: false,
            },
            technical::cross_ma,
        ),
        (
            FactorInfo {
                name: "macd",
                kind: FactorKind::Indicator,
                description: "MACD with golden/dead cross run lengths",
                required_columns: CLOSE,
                stateful: false,
            },
            technical::macd,
        ),
        (
            FactorInfo {
                name: "bull",
                kind: FactorKind::Filter,
                description: "MACD diff and dea both positive",
                required_columns: CLOSE,
                stateful: false,
            },
            technical::bull,
        ),
        (
            FactorInfo {
                name: "zen",
                kind: FactorKind::Filter,
                description: "Chan-analysis strokes, segments and centers; inside an up segment",
                required_columns: HIGH_LOW_CLOSE,
                stateful: true,
            },
            technical::zen,
        ),
        (
            FactorInfo {
                name: "ma_stats",
                kind: FactorKind::Filter,
                description: "Run length and area between the 5 and 10 bar moving averages",
                required_columns: CLOSE,
                stateful: true,
            },
            technical::ma_stats,
        ),
        (
            FactorInfo {
                name: "change_pct_rank",
                kind: FactorKind::Score,
                description: "Cross-sectional percentile rank of the daily change",
                required_columns: CLOSE,
                stateful: false,
            },
            technical::change_pct_rank,
        ),
    ]
}
