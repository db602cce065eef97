//! Chan-analysis (zen) structural pattern recognition.
//!
//! Bars are merged for containment and scanned for turning points (fenxing). Consecutive
//! turning points of opposite kind delimit strokes (bi); three overlapping strokes confirm
//! a segment (duan); overlapping endpoint ranges form centers (zhongshu), both at stroke
//! and at segment level.
//!
//! The machine is a pure fold over bars (see [`state::step`]), so its carried
//! [`ZenState`] is all that is needed to resume on new bars.

pub mod accumulator;
pub mod model;
pub mod state;

pub use accumulator::{ZenAccumulator, ZenColumn, ZenConfig};
pub use model::{Direction, DuanState, Fenxing, FenxingKind, KBar, KData, Leg, Point, Rect};
pub use state::{ZenRow, ZenState};
