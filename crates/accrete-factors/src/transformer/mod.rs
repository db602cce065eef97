//! Stateless transformers.
//!
//! A [`Transformer`] maps a multi-entity frame to the same rows with extra indicator
//! columns. It sees each entity's full available series, processes entities
//! independently and keeps no memory between calls, so re-running it on the same input
//! reproduces the same output.

pub mod ma;
pub mod macd;

pub use ma::{MaConfig, MaTransformer, ma_column};
pub use macd::{MacdColumn, MacdConfig, MacdTransformer};

use crate::error::Result;
use accrete_data::Column;
use polars::prelude::DataFrame;
use std::fmt;

/// Stateless per-entity mapping that adds indicator columns.
pub trait Transformer: fmt::Debug {
    /// Unique identifier for this transformer.
    fn name(&self) -> &str;

    /// Names of the columns added by [`Transformer::transform`].
    fn indicators(&self) -> Vec<String>;

    /// Raw columns the input frame must carry.
    fn required_columns(&self) -> Vec<Column>;

    /// Add indicator columns. Rows and existing columns are left untouched, except that
    /// indicator columns already present are recomputed in place.
    fn transform(&self, df: &DataFrame) -> Result<DataFrame>;
}
