//! SQLite storage for bars, factor rows and factor state.

use crate::error::{DataError, Result};
use crate::frame::{FactorRecord, bars_to_frame, empty_frame, frame_to_records, records_to_frame};
use crate::model::{Bar, Column, format_timestamp, parse_timestamp};
use crate::store::{OnConflict, StoreStats, TimeSeriesStore, state_id};
use chrono::{NaiveDateTime, Utc};
use polars::prelude::*;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// SQLite-backed [`TimeSeriesStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        // Raw bars
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS bars (
                entity_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL,
                turnover REAL,
                PRIMARY KEY (entity_id, timestamp)
            )",
            [],
        )?;

        // Factor output rows
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS factor_result (
                id TEXT PRIMARY KEY,
                factor_name TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_factor_result_entity
             ON factor_result(factor_name, entity_id, timestamp)",
            [],
        )?;

        // One state blob per (factor_name, entity_id)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS factor_state (
                id TEXT PRIMARY KEY,
                factor_name TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn check_range(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Result<()> {
        match (start, end) {
            (Some(start), Some(end)) if start > end => Err(DataError::InvalidDateRange {
                start: format_timestamp(start),
                end: format_timestamp(end),
            }),
            _ => Ok(()),
        }
    }

    fn sorted_ids(entity_ids: &[String]) -> Vec<String> {
        let mut ids = entity_ids.to_vec();
        ids.sort();
        ids.dedup();
        ids
    }

    fn query_bars(
        &self,
        entity_id: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<Bar>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT entity_id, timestamp, open, high, low, close, volume, turnover
             FROM bars
             WHERE entity_id = ?1
               AND (?2 IS NULL OR timestamp >= ?2)
               AND (?3 IS NULL OR timestamp <= ?3)
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![entity_id, start, end], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, Option<f64>>(7)?,
            ))
        })?;

        let mut bars = Vec::new();
        for row in rows {
            let (entity_id, timestamp, open, high, low, close, volume, turnover) = row?;
            bars.push(Bar {
                entity_id,
                timestamp: parse_timestamp(&timestamp)?,
                open,
                high,
                low,
                close,
                volume,
                turnover,
            });
        }
        Ok(bars)
    }

    fn query_records(
        &self,
        factor_name: &str,
        entity_id: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<FactorRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT entity_id, timestamp, data
             FROM factor_result
             WHERE factor_name = ?1 AND entity_id = ?2
               AND (?3 IS NULL OR timestamp >= ?3)
               AND (?4 IS NULL OR timestamp <= ?4)
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(params![factor_name, entity_id, start, end], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (entity_id, timestamp, data) = row?;
            records.push(FactorRecord {
                entity_id,
                timestamp: parse_timestamp(&timestamp)?,
                values: serde_json::from_str(&data)?,
            });
        }
        Ok(records)
    }

    fn write_records(
        tx: &Transaction<'_>,
        factor_name: &str,
        records: &[FactorRecord],
        on_conflict: OnConflict,
    ) -> Result<usize> {
        let sql = match on_conflict {
            OnConflict::SkipExisting => {
                "INSERT OR IGNORE INTO factor_result
                 (id, factor_name, entity_id, timestamp, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            }
            OnConflict::Overwrite => {
                "INSERT OR REPLACE INTO factor_result
                 (id, factor_name, entity_id, timestamp, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            }
        };
        let updated_at = Utc::now().to_rfc3339();

        let mut written = 0;
        for record in records {
            let data = serde_json::to_string(&record.values)?;
            written += tx.execute(
                sql,
                params![
                    record.id(factor_name),
                    factor_name,
                    record.entity_id,
                    format_timestamp(record.timestamp),
                    data,
                    updated_at
                ],
            )?;
        }
        Ok(written)
    }

    fn write_state(
        tx: &Transaction<'_>,
        factor_name: &str,
        entity_id: &str,
        state: &str,
    ) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO factor_state (id, factor_name, entity_id, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state_id(factor_name, entity_id),
                factor_name,
                entity_id,
                state,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Delete every persisted row and state blob of a factor.
    pub fn clear_factor(&self, factor_name: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM factor_result WHERE factor_name = ?1",
            params![factor_name],
        )?;
        self.conn.execute(
            "DELETE FROM factor_state WHERE factor_name = ?1",
            params![factor_name],
        )?;
        Ok(())
    }
}

impl TimeSeriesStore for SqliteStore {
    fn query_time_series(
        &self,
        entity_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        columns: &[Column],
    ) -> Result<DataFrame> {
        Self::check_range(start, end)?;
        let start = start.map(format_timestamp);
        let end = end.map(format_timestamp);

        let mut bars = Vec::new();
        for entity_id in Self::sorted_ids(entity_ids) {
            bars.extend(self.query_bars(&entity_id, start.as_deref(), end.as_deref())?);
        }
        debug!(entities = entity_ids.len(), rows = bars.len(), "Queried time series");

        let df = bars_to_frame(&bars)?;
        if columns.is_empty() {
            return Ok(df);
        }

        let mut selected: Vec<&str> = Column::KEYS.iter().map(Column::name).collect();
        for column in columns {
            if !selected.contains(&column.name()) {
                selected.push(column.name());
            }
        }
        Ok(df.select(selected)?)
    }

    fn query_factor_result(
        &self,
        factor_name: &str,
        entity_ids: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<DataFrame> {
        Self::check_range(start, end)?;
        let start = start.map(format_timestamp);
        let end = end.map(format_timestamp);

        let mut records = Vec::new();
        for entity_id in Self::sorted_ids(entity_ids) {
            records.extend(self.query_records(
                factor_name,
                &entity_id,
                start.as_deref(),
                end.as_deref(),
            )?);
        }
        if records.is_empty() {
            return empty_frame();
        }
        records_to_frame(&records)
    }

    fn query_factor_state(
        &self,
        factor_name: &str,
        entity_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT state FROM factor_state WHERE id = ?1")?;

        let mut states = HashMap::new();
        for entity_id in entity_ids {
            let state: Option<String> = stmt
                .query_row(params![state_id(factor_name, entity_id)], |row| row.get(0))
                .optional()?;
            if let Some(state) = state {
                states.insert(entity_id.clone(), state);
            }
        }
        Ok(states)
    }

    fn upsert_bars(&self, bars: &[Bar]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;

        let mut written = 0;
        for bar in bars {
            written += tx.execute(
                "INSERT OR REPLACE INTO bars
                 (entity_id, timestamp, open, high, low, close, volume, turnover)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bar.entity_id,
                    format_timestamp(bar.timestamp),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.turnover
                ],
            )?;
        }

        tx.commit()?;
        Ok(written)
    }

    fn upsert_factor_result(
        &self,
        factor_name: &str,
        rows: &DataFrame,
        on_conflict: OnConflict,
    ) -> Result<usize> {
        let records = frame_to_records(rows)?;
        let tx = self.conn.unchecked_transaction()?;
        let written = Self::write_records(&tx, factor_name, &records, on_conflict)?;
        tx.commit()?;
        Ok(written)
    }

    fn upsert_factor_state(&self, factor_name: &str, entity_id: &str, state: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::write_state(&tx, factor_name, entity_id, state)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_state(&self, factor_name: &str, entity_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM factor_state WHERE id = ?1",
            params![state_id(factor_name, entity_id)],
        )?;
        Ok(())
    }

    fn delete_result(&self, factor_name: &str, entity_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM factor_result WHERE factor_name = ?1 AND entity_id = ?2",
            params![factor_name, entity_id],
        )?;
        Ok(())
    }

    fn entity_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT entity_id FROM bars ORDER BY entity_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn latest_timestamp(&self, entity_id: &str) -> Result<Option<NaiveDateTime>> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(timestamp) FROM bars WHERE entity_id = ?1",
            params![entity_id],
            |row| row.get(0),
        )?;
        latest.as_deref().map(parse_timestamp).transpose()
    }

    fn stats(&self) -> Result<StoreStats> {
        let bars: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM bars", [], |row| row.get(0))?;

        let entities: i64 =
            self.conn
                .query_row("SELECT COUNT(DISTINCT entity_id) FROM bars", [], |row| {
                    row.get(0)
                })?;

        let factor_rows: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM factor_result", [], |row| row.get(0))?;

        let factor_states: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM factor_state", [], |row| row.get(0))?;

        Ok(StoreStats {
            bars: bars as usize,
            entities: entities as usize,
            factor_rows: factor_rows as usize,
            factor_states: factor_states as usize,
        })
    }

    fn commit_entity(
        &self,
        factor_name: &str,
        entity_id: &str,
        rows: &DataFrame,
        state: Option<&str>,
    ) -> Result<()> {
        let records = frame_to_records(rows)?;
        let tx = self.conn.unchecked_transaction()?;
        Self::write_records(&tx, factor_name, &records, OnConflict::Overwrite)?;
        if let Some(state) = state {
            Self::write_state(&tx, factor_name, entity_id, state)?;
        }
        tx.commit()?;
        debug!(factor = factor_name, entity_id, rows = records.len(), "Committed entity");
        Ok(())
    }
}
