//! Structural entities of the zen state machine.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Trend direction.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Rising
    #[display("up")]
    Up,
    /// Falling
    #[display("down")]
    Down,
}

impl Direction {
    /// The other direction.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// Kind of turning point that ends a stroke running in this direction.
    pub const fn hunted(self) -> FenxingKind {
        match self {
            Self::Up => FenxingKind::BiDing,
            Self::Down => FenxingKind::BiDi,
        }
    }
}

/// Turning point type.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenxingKind {
    /// Top
    #[display("bi_ding")]
    BiDing,
    /// Bottom
    #[display("bi_di")]
    BiDi,
}

/// Price range of a bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KData {
    /// Low price
    pub low: f64,
    /// High price
    pub high: f64,
}

/// A bar as seen by the state machine, after containment merging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KBar {
    /// Position in the entity's accumulated sequence
    pub index: usize,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
}

impl KBar {
    /// Price range of the bar.
    pub const fn kdata(&self) -> KData {
        KData {
            low: self.low,
            high: self.high,
        }
    }

    /// Whether this bar's range covers `other`'s.
    pub fn includes(&self, other: &Self) -> bool {
        self.high >= other.high && self.low <= other.low
    }
}

/// A turning point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fenxing {
    /// Top or bottom
    pub state: FenxingKind,
    /// Range of the bar at the turning point
    pub kdata: KData,
    /// Position of that bar
    pub index: usize,
}

impl Fenxing {
    /// Turning point of the given kind at a bar.
    pub const fn at(state: FenxingKind, bar: &KBar) -> Self {
        Self {
            state,
            kdata: bar.kdata(),
            index: bar.index,
        }
    }

    /// Extreme price: the high of a top, the low of a bottom.
    pub const fn value(&self) -> f64 {
        match self.state {
            FenxingKind::BiDing => self.kdata.high,
            FenxingKind::BiDi => self.kdata.low,
        }
    }

    /// Whether `self` is at least as extreme as `other` for its kind.
    pub fn at_least_as_extreme(&self, other: &Self) -> bool {
        match self.state {
            FenxingKind::BiDing => self.kdata.high >= other.kdata.high,
            FenxingKind::BiDi => self.kdata.low <= other.kdata.low,
        }
    }

    /// The turning point as a point.
    pub const fn point(&self) -> Point {
        Point {
            index: self.index,
            value: self.value(),
        }
    }
}

/// A stroke or segment endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Bar position
    pub index: usize,
    /// Price
    pub value: f64,
}

/// A center (zhongshu): a consolidation band between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Start position
    pub x0: usize,
    /// End position
    pub x1: usize,
    /// Lower bound of the band
    pub y0: f64,
    /// Upper bound of the band
    pub y1: f64,
}

impl Rect {
    /// Band width relative to its lower bound.
    pub fn change(&self) -> Option<f64> {
        (self.y0 != 0.0).then(|| (self.y1 - self.y0).abs() / self.y0)
    }

    /// Number of bars spanned.
    pub const fn interval(&self) -> usize {
        self.x1 - self.x0
    }
}

/// Running segment direction.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuanState {
    /// No segment confirmed yet
    #[default]
    #[display("yi")]
    Yi,
    /// Rising segment
    #[display("up")]
    Up,
    /// Falling segment
    #[display("down")]
    Down,
}

/// Move statistics between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    /// Relative price change from the previous endpoint
    pub change: Option<f64>,
    /// `change` per bar
    pub slope: Option<f64>,
    /// Bars between the endpoints
    pub interval: usize,
}

impl Leg {
    /// Statistics of the move from `from` to `to`.
    pub fn between(from: &Point, to: &Point) -> Self {
        let interval = to.index.saturating_sub(from.index);
        let change = (from.value != 0.0).then(|| (to.value - from.value) / from.value);
        let slope = change.and_then(|c| (interval > 0).then(|| c / interval as f64));
        Self {
            change,
            slope,
            interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_direction() {
        assert_eq!(Direction::Up.opposite(), Direction::Down);
        assert_eq!(Direction::Up.hunted(), FenxingKind::BiDing);
        assert_eq!(Direction::Down.hunted(), FenxingKind::BiDi);
        assert_eq!(FenxingKind::BiDing.to_string(), "bi_ding");
        assert_eq!(DuanState::default().to_string(), "yi");
    }

    #[test]
    fn test_fenxing_extremes() {
        let bar = KBar {
            index: 3,
            high: 10.0,
            low: 8.0,
            close: 9.0,
        };
        let top = Fenxing::at(FenxingKind::BiDing, &bar);
        assert_eq!(top.value(), 10.0);
        assert_eq!(
            top.point(),
            Point {
                index: 3,
                value: 10.0
            }
        );

        let later = KBar { index: 5, ..bar };
        let higher = Fenxing::at(FenxingKind::BiDing, &later);
        assert!(higher.at_least_as_extreme(&top));
        let lower = Fenxing::at(FenxingKind::BiDi, &KBar { low: 7.0, ..bar });
        assert_eq!(lower.value(), 7.0);
    }

    #[test]
    fn test_rect_and_leg() {
        let rect = Rect {
            x0: 2,
            x1: 9,
            y0: 3.0,
            y1: 5.0,
        };
        assert_relative_eq!(rect.change().unwrap(), 2.0 / 3.0);
        assert_eq!(rect.interval(), 7);

        let start = Point {
            index: 0,
            value: 10.0,
        };
        let end = Point {
            index: 4,
            value: 12.0,
        };
        let leg = Leg::between(&start, &end);
        assert_relative_eq!(leg.change.unwrap(), 0.2);
        assert_relative_eq!(leg.slope.unwrap(), 0.05);
        assert_eq!(leg.interval, 4);
    }
}
