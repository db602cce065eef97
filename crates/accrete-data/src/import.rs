//! CSV import of raw bars.
//!
//! Expected header: `entity_id,timestamp,open,high,low,close[,volume,turnover]`.
//! Timestamps are `%Y-%m-%d %H:%M:%S` or plain `%Y-%m-%d` dates.

use crate::error::Result;
use crate::model::{Bar, parse_timestamp};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CsvBar {
    entity_id: String,
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    turnover: Option<f64>,
}

/// Read bars from any CSV source.
pub fn read_bars<R: Read>(source: R) -> Result<Vec<Bar>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut bars = Vec::new();
    for row in reader.deserialize() {
        let row: CsvBar = row?;
        bars.push(Bar {
            entity_id: row.entity_id,
            timestamp: parse_timestamp(&row.timestamp)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            turnover: row.turnover,
        });
    }
    Ok(bars)
}

/// Read bars from a CSV file.
pub fn read_bars_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Bar>> {
    let file = std::fs::File::open(path.as_ref())?;
    let bars = read_bars(file)?;
    debug!(path = %path.as_ref().display(), rows = bars.len(), "Read bars");
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataError;

    #[test]
    fn test_read_bars() {
        let data = "\
entity_id,timestamp,open,high,low,close,volume,turnover
stock_sz_000001,2024-01-02,10.0,11.0,9.5,10.5,1000,
stock_sz_000001,2024-01-03 00:00:00,10.5,12.0,10.0,11.5,,
";
        let bars = read_bars(data.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, Some(1000.0));
        assert_eq!(bars[0].turnover, None);
        assert_eq!(bars[1].close, 11.5);
        assert_eq!(bars[1].timestamp, parse_timestamp("2024-01-03").unwrap());
    }

    #[test]
    fn test_read_bars_without_optional_columns() {
        let data =
            "entity_id,timestamp,open,high,low,close\nfuture_shfe_cu,2024-01-02,1,2,0.5,1.5\n";
        let bars = read_bars(data.as_bytes()).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, None);
    }

    #[test]
    fn test_read_bars_rejects_bad_timestamp() {
        let data = "entity_id,timestamp,open,high,low,close\nx_y_z,yesterday,1,2,0.5,1.5\n";
        assert!(matches!(read_bars(data.as_bytes()), Err(DataError::Parse(_))));
    }
}
