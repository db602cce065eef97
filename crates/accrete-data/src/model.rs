//! Core data model: raw bars, typed column names and entity identifiers.

use crate::error::{DataError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Format used for timestamps in storage and record ids.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw time-series columns known to every frame.
///
/// `EntityId` and `Timestamp` form the composite key of a multi-entity frame; every
/// windowed operation groups by the former and orders by the latter.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    /// Entity identifier, e.g. `stock_sz_000001`
    #[display("entity_id")]
    EntityId,
    /// Bar timestamp
    #[display("timestamp")]
    Timestamp,
    /// Opening price
    #[display("open")]
    Open,
    /// Highest price
    #[display("high")]
    High,
    /// Lowest price
    #[display("low")]
    Low,
    /// Closing price
    #[display("close")]
    Close,
    /// Traded volume
    #[display("volume")]
    Volume,
    /// Traded turnover
    #[display("turnover")]
    Turnover,
}

impl Column {
    /// Key columns present in every frame.
    pub const KEYS: [Self; 2] = [Self::EntityId, Self::Timestamp];

    /// Price columns required by bar-based computations.
    pub const OHLC: [Self; 4] = [Self::Open, Self::High, Self::Low, Self::Close];

    /// Every raw column, in storage order.
    pub const ALL: [Self; 8] = [
        Self::EntityId,
        Self::Timestamp,
        Self::Open,
        Self::High,
        Self::Low,
        Self::Close,
        Self::Volume,
        Self::Turnover,
    ];

    /// Column name as used in frames and storage.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EntityId => "entity_id",
            Self::Timestamp => "timestamp",
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::Volume => "volume",
            Self::Turnover => "turnover",
        }
    }

    /// Whether the column may hold missing values.
    pub const fn is_optional(&self) -> bool {
        matches!(self, Self::Volume | Self::Turnover)
    }
}

impl FromStr for Column {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| DataError::MissingColumn(s.to_string()))
    }
}

/// One raw time-series row for a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Entity the bar belongs to
    pub entity_id: String,
    /// Bar timestamp, unique and strictly increasing within an entity
    pub timestamp: NaiveDateTime,
    /// Opening price
    pub open: f64,
    /// Highest price
    pub high: f64,
    /// Lowest price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    #[serde(default)]
    pub volume: Option<f64>,
    /// Traded turnover
    #[serde(default)]
    pub turnover: Option<f64>,
}

impl Bar {
    /// Create a bar without volume or turnover.
    pub fn new(
        entity_id: impl Into<String>,
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume: None,
            turnover: None,
        }
    }

    /// Attach a traded volume.
    pub const fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Structured entity identifier of the form `{entity_type}_{exchange}_{code}`.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{entity_type}_{exchange}_{code}")]
pub struct EntityId {
    /// Entity type, e.g. `stock`
    pub entity_type: String,
    /// Exchange, e.g. `sz`
    pub exchange: String,
    /// Exchange-local code, e.g. `000001`
    pub code: String,
}

impl FromStr for EntityId {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(entity_type), Some(exchange), Some(code))
                if !entity_type.is_empty() && !exchange.is_empty() && !code.is_empty() =>
            {
                Ok(Self {
                    entity_type: entity_type.to_string(),
                    exchange: exchange.to_string(),
                    code: code.to_string(),
                })
            }
            _ => Err(DataError::Parse(format!("Invalid entity id: {}", s))),
        }
    }
}

/// Milliseconds since the Unix epoch, as stored in frame timestamp columns.
pub fn to_millis(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

/// Inverse of [`to_millis`].
pub fn from_millis(ms: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| DataError::Parse(format!("Timestamp out of range: {}", ms)))
}

/// Format a timestamp for storage.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Plain dates (`%Y-%m-%d`) are accepted as midnight.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Ok(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| DataError::Parse(format!("Invalid timestamp: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_column_names_round_trip() {
        for column in Column::ALL {
            assert_eq!(column.name(), column.to_string());
            assert_eq!(column.name().parse::<Column>().unwrap(), column);
        }
        assert!("ma5".parse::<Column>().is_err());
    }

    #[test]
    fn test_entity_id_parsing() {
        let id: EntityId = "stock_sz_000001".parse().unwrap();
        assert_eq!(id.entity_type, "stock");
        assert_eq!(id.exchange, "sz");
        assert_eq!(id.code, "000001");
        assert_eq!(id.to_string(), "stock_sz_000001");

        let id: EntityId = "future_shfe_cu_2401".parse().unwrap();
        assert_eq!(id.code, "cu_2401");
    }

    #[rstest]
    #[case("")]
    #[case("stock")]
    #[case("stock_sz")]
    #[case("stock__000001")]
    fn test_entity_id_rejects_malformed(#[case] raw: &str) {
        assert!(raw.parse::<EntityId>().is_err());
    }

    #[rstest]
    #[case("2024-01-02", "2024-01-02 00:00:00")]
    #[case("2024-01-02 09:30:00", "2024-01-02 09:30:00")]
    #[case("2024-01-02T09:30:00", "2024-01-02 09:30:00")]
    fn test_parse_timestamp(#[case] raw: &str, #[case] expected: &str) {
        let ts = parse_timestamp(raw).unwrap();
        assert_eq!(format_timestamp(ts), expected);
    }

    #[test]
    fn test_millis_round_trip() {
        let ts = parse_timestamp("2024-03-15 14:59:00").unwrap();
        assert_eq!(from_millis(to_millis(ts)).unwrap(), ts);
    }
}
