//! Factor orchestration.
//!
//! A [`Factor`] turns raw bars into a derived result in four stages:
//!
//! 1. `pre_compute` reads the raw rows of the selected entities, bounded to a lookback
//!    window before the first unpersisted row when `computing_window` is set;
//! 2. `compute_factor` applies the [`Transformer`] and extends each entity's previous
//!    result through the [`Accumulator`], one entity at a time in id order;
//! 3. `compute_result` derives `filter_result` through a [`Signal`] or `score_result`
//!    through a [`Scorer`];
//! 4. `after_compute` persists each entity's new rows together with its state, fills
//!    calendar gaps and bounds the in-memory frames.
//!
//! Failures of one entity are reported in the [`ComputeReport`] and never stop the
//! others.

pub mod config;
pub mod fill;
pub mod report;

pub use config::{FactorConfig, FillMethod};
pub use fill::fill_gap;
pub use report::{ComputeReport, EntityFailure, FactorPhase};

use crate::accumulator::{Accumulation, Accumulator, FactorState};
use crate::error::{FactorError, Result};
use crate::scorer::Scorer;
use crate::signal::Signal;
use crate::transformer::Transformer;
use accrete_data::frame::{
    concat_aligned, empty_frame, entity_rows, last_timestamps, lookback_rows, rows_after_timestamp,
    slice_rows, sort_frame, tail_per_entity, without_entity,
};
use accrete_data::{Column, TimeSeriesStore};
use chrono::NaiveDateTime;
use polars::prelude::DataFrame;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Orchestrates the computation of one factor over a set of entities.
#[derive(Debug)]
pub struct Factor {
    name: String,
    config: FactorConfig,
    store: Rc<dyn TimeSeriesStore>,
    entity_ids: Vec<String>,
    transformer: Option<Box<dyn Transformer>>,
    accumulator: Option<Box<dyn Accumulator>>,
    signal: Option<Box<dyn Signal>>,
    scorer: Option<Box<dyn Scorer>>,
    data_df: DataFrame,
    factor_df: DataFrame,
    result_df: DataFrame,
    states: BTreeMap<String, FactorState>,
    persisted_states: BTreeMap<String, FactorState>,
    persisted_until: HashMap<String, NaiveDateTime>,
    phase: FactorPhase,
}

impl Factor {
    /// Create a factor over the entities of `store` matching the configured selection.
    ///
    /// Fails with [`FactorError::Configuration`] on incompatible settings and with
    /// [`FactorError::NoData`] when no entity matches.
    pub fn new(
        name: impl Into<String>,
        store: Rc<dyn TimeSeriesStore>,
        config: FactorConfig,
    ) -> Result<Self> {
        let name = name.into();
        config.validate()?;

        let universe = store.entity_ids()?;
        let entity_ids = config.selection.resolve(&universe);
        if entity_ids.is_empty() {
            return Err(FactorError::NoData(format!(
                "no entity matches the selection of {}",
                name
            )));
        }
        info!(factor = %name, entities = entity_ids.len(), "factor created");

        Ok(Self {
            name,
            config,
            store,
            entity_ids,
            transformer: None,
            accumulator: None,
            signal: None,
            scorer: None,
            data_df: empty_frame()?,
            factor_df: empty_frame()?,
            result_df: empty_frame()?,
            states: BTreeMap::new(),
            persisted_states: BTreeMap::new(),
            persisted_until: HashMap::new(),
            phase: FactorPhase::Created,
        })
    }

    /// Set the transformer.
    pub fn with_transformer<T: Transformer + 'static>(mut self, transformer: T) -> Self {
        self.transformer = Some(Box::new(transformer));
        self
    }

    /// Set the accumulator.
    pub fn with_accumulator<A: Accumulator + 'static>(mut self, accumulator: A) -> Self {
        self.accumulator = Some(Box::new(accumulator));
        self
    }

    /// Set the result signal. Takes precedence over a scorer.
    pub fn with_signal<S: Signal + 'static>(mut self, signal: S) -> Self {
        self.signal = Some(Box::new(signal));
        self
    }

    /// Set the result scorer.
    pub fn with_scorer<S: Scorer + 'static>(mut self, scorer: S) -> Self {
        self.scorer = Some(Box::new(scorer));
        self
    }

    /// Factor name, also the key of its persisted rows and states.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration.
    pub const fn config(&self) -> &FactorConfig {
        &self.config
    }

    /// Resolved entities, sorted.
    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    /// Current lifecycle phase.
    pub const fn phase(&self) -> FactorPhase {
        self.phase
    }

    /// Raw rows read by the last compute.
    pub const fn data_df(&self) -> &DataFrame {
        &self.data_df
    }

    /// Raw rows with indicator columns.
    pub const fn factor_df(&self) -> &DataFrame {
        &self.factor_df
    }

    /// Key columns with `filter_result` or `score_result`, or the factor frame when
    /// neither a signal nor a scorer is set.
    pub const fn result_df(&self) -> &DataFrame {
        &self.result_df
    }

    /// Accumulator state of one entity.
    pub fn state(&self, entity_id: &str) -> Option<&FactorState> {
        self.states.get(entity_id)
    }

    fn required_columns(&self) -> Vec<Column> {
        let mut columns: BTreeSet<Column> = self.config.columns.iter().copied().collect();
        if let Some(transformer) = &self.transformer {
            columns.extend(transformer.required_columns());
        }
        if let Some(accumulator) = &self.accumulator {
            columns.extend(accumulator.required_columns());
        }
        columns.into_iter().collect()
    }

    const fn writes(&self) -> bool {
        self.config.need_persist && !self.config.dry_run
    }

    /// Run the whole pipeline on the rows currently available.
    pub fn compute(&mut self) -> Result<ComputeReport> {
        if self.phase == FactorPhase::Created {
            if self.config.clear_state {
                self.clear_state()?;
            }
            if self.config.need_persist {
                self.load_factor()?;
            }
            self.phase = FactorPhase::Loaded;
        }

        self.phase = FactorPhase::Computing;
        let mut report = ComputeReport::default();
        self.pre_compute()?;
        self.compute_factor(&mut report)?;
        self.compute_result()?;
        self.after_compute(&mut report)?;
        self.phase = FactorPhase::Ready;

        info!(
            factor = %self.name,
            computed = report.computed.len(),
            up_to_date = report.up_to_date.len(),
            insufficient = report.insufficient.len(),
            restarted = report.restarted.len(),
            failed = report.failed.len(),
            "compute finished"
        );
        Ok(report)
    }

    /// Wait for newer bars, then compute incrementally.
    ///
    /// Polls the store every `poll_interval` until every entity has a bar newer than the
    /// last one it was computed on (and at least `to_timestamp`, when given). Entities still
    /// waiting after `timeout` are computed on the rows available and listed as stale.
    pub fn move_on(
        &mut self,
        to_timestamp: Option<NaiveDateTime>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<ComputeReport> {
        if let Some(to) = to_timestamp
            && self.config.end_timestamp.is_some_and(|end| end < to)
        {
            self.config.end_timestamp = Some(to);
        }

        // newest bar each entity was last computed on, including entities that produced
        // no row yet
        let mut known = last_timestamps(&self.factor_df)?;
        for (entity_id, seen) in last_timestamps(&self.data_df)? {
            known
                .entry(entity_id)
                .and_modify(|last| *last = (*last).max(seen))
                .or_insert(seen);
        }
        let deadline = Instant::now() + timeout;
        let mut pending = self.entity_ids.clone();
        loop {
            let mut waiting = Vec::new();
            for entity_id in pending {
                let ready = self.store.latest_timestamp(&entity_id)?.is_some_and(|latest| {
                    known.get(&entity_id).is_none_or(|last| latest > *last)
                        && to_timestamp.is_none_or(|to| latest >= to)
                });
                if !ready {
                    waiting.push(entity_id);
                }
            }
            pending = waiting;

            let now = Instant::now();
            if pending.is_empty() || now >= deadline {
                break;
            }
            debug!(factor = %self.name, waiting = pending.len(), "waiting for new bars");
            std::thread::sleep(poll_interval.min(deadline - now));
        }

        for entity_id in &pending {
            warn!(factor = %self.name, entity_id = %entity_id, "timed out waiting for new bars");
        }
        let mut report = self.compute()?;
        report.stale = pending;
        Ok(report)
    }

    /// Wipe persisted rows and states of every entity.
    pub fn clear_state(&mut self) -> Result<()> {
        if self.writes() {
            for entity_id in &self.entity_ids {
                self.store.delete_state(&self.name, entity_id)?;
                self.store.delete_result(&self.name, entity_id)?;
            }
        }
        info!(factor = %self.name, dry_run = self.config.dry_run, "state cleared");
        self.factor_df = empty_frame()?;
        self.states.clear();
        self.persisted_states.clear();
        self.persisted_until.clear();
        Ok(())
    }

    /// Load persisted rows and states.
    ///
    /// A state blob that is not valid JSON is skipped; the entity then restarts cold.
    pub fn load_factor(&mut self) -> Result<()> {
        let persisted = self.store.query_factor_result(
            &self.name,
            &self.entity_ids,
            self.config.start_timestamp,
            None,
        )?;
        self.persisted_until = last_timestamps(&persisted)?;

        for (entity_id, raw) in self.store.query_factor_state(&self.name, &self.entity_ids)? {
            match FactorState::decode(&raw) {
                Ok(state) => {
                    self.persisted_states.insert(entity_id.clone(), state.clone());
                    self.states.insert(entity_id, state);
                }
                Err(e) => {
                    warn!(
                        factor = %self.name,
                        entity_id = %entity_id,
                        error = %e,
                        "unreadable state"
                    )
                }
            }
        }

        info!(
            factor = %self.name,
            rows = persisted.height(),
            states = self.states.len(),
            "loaded persisted factor"
        );
        self.factor_df = persisted;
        Ok(())
    }

    fn pre_compute(&mut self) -> Result<()> {
        let columns = self.required_columns();
        let data = self.store.query_time_series(
            &self.entity_ids,
            self.config.start_timestamp,
            self.config.end_timestamp,
            &columns,
        )?;
        let data = match self.config.computing_window {
            Some(window) if self.factor_df.height() > 0 => {
                lookback_rows(&data, &last_timestamps(&self.factor_df)?, window)?
            }
            _ => data,
        };
        info!(factor = %self.name, rows = data.height(), "pre_compute");
        self.data_df = data;
        Ok(())
    }

    fn compute_factor(&mut self, report: &mut ComputeReport) -> Result<()> {
        let transformed = match &self.transformer {
            Some(transformer) if self.data_df.height() > 0 => {
                info!(factor = %self.name, transformer = transformer.name(), "transform");
                transformer.transform(&self.data_df)?
            }
            _ => self.data_df.clone(),
        };

        let Some(accumulator) = &self.accumulator else {
            let before = last_timestamps(&self.factor_df)?;
            let after = last_timestamps(&transformed)?;
            for entity_id in &self.entity_ids {
                match (before.get(entity_id), after.get(entity_id)) {
                    (_, None) => report.insufficient.push(entity_id.clone()),
                    (Some(b), Some(a)) if a <= b => report.up_to_date.push(entity_id.clone()),
                    _ => report.computed.push(entity_id.clone()),
                }
            }
            info!(factor = %self.name, rows = transformed.height(), "compute_factor");
            self.factor_df = transformed;
            return Ok(());
        };

        let (factor_df, states, restarted) =
            self.accumulate_all(accumulator.as_ref(), &transformed, report)?;
        info!(factor = %self.name, rows = factor_df.height(), "compute_factor");
        self.factor_df = factor_df;
        self.states = states;
        for entity_id in restarted {
            self.persisted_until.remove(&entity_id);
        }
        Ok(())
    }

    fn accumulate_all(
        &self,
        accumulator: &dyn Accumulator,
        transformed: &DataFrame,
        report: &mut ComputeReport,
    ) -> Result<(DataFrame, BTreeMap<String, FactorState>, Vec<String>)> {
        let mut factor_df = empty_frame()?;
        let mut states = BTreeMap::new();
        let mut restarted = Vec::new();

        for entity_id in &self.entity_ids {
            let rows = entity_rows(transformed, entity_id)?;
            let previous = entity_rows(&self.factor_df, entity_id)?;
            let previous_rows = previous.height();
            if rows.height() == 0 && previous_rows == 0 {
                report.insufficient.push(entity_id.clone());
                continue;
            }
            debug!(
                factor = %self.name,
                entity_id = %entity_id,
                rows = rows.height(),
                previous_rows,
                "accumulate"
            );

            let outcome = match accumulator.accumulate(
                entity_id,
                &rows,
                (previous_rows > 0).then_some(&previous),
                self.states.get(entity_id),
            ) {
                Err(FactorError::StateCorruption { reason, .. }) => {
                    warn!(
                        factor = %self.name,
                        entity_id = %entity_id,
                        reason = %reason,
                        "corrupted state, restarting from scratch"
                    );
                    restarted.push(entity_id.clone());
                    self.cold_restart(accumulator, entity_id).map(|acc| (acc, true))
                }
                other => other.map(|acc| (acc, false)),
            };

            match outcome {
                Ok((Accumulation { result, state }, cold)) => {
                    if cold {
                        report.restarted.push(entity_id.clone());
                    } else if result.height() > previous_rows {
                        report.computed.push(entity_id.clone());
                    } else {
                        report.up_to_date.push(entity_id.clone());
                    }
                    factor_df = concat_aligned(&factor_df, &result)?;
                    states.insert(entity_id.clone(), state);
                }
                Err(FactorError::InsufficientData {
                    required,
                    available,
                    ..
                }) => {
                    warn!(
                        factor = %self.name,
                        entity_id = %entity_id,
                        required,
                        available,
                        "insufficient data, retrying with more rows"
                    );
                    report.insufficient.push(entity_id.clone());
                }
                Err(e) => {
                    if e.is_entity_scoped() {
                        warn!(
                            factor = %self.name,
                            entity_id = %entity_id,
                            error = %e,
                            "accumulate failed"
                        );
                    } else {
                        error!(
                            factor = %self.name,
                            entity_id = %entity_id,
                            error = %e,
                            "accumulate failed"
                        );
                    }
                    report.fail(entity_id, &e);
                    if !restarted.contains(entity_id) {
                        factor_df = concat_aligned(&factor_df, &previous)?;
                        if let Some(state) = self.states.get(entity_id) {
                            states.insert(entity_id.clone(), state.clone());
                        }
                    }
                }
            }
        }
        Ok((factor_df, states, restarted))
    }

    fn cold_restart(&self, accumulator: &dyn Accumulator, entity_id: &str) -> Result<Accumulation> {
        let data = self.store.query_time_series(
            &[entity_id.to_string()],
            self.config.start_timestamp,
            self.config.end_timestamp,
            &self.required_columns(),
        )?;
        let data = match &self.transformer {
            Some(transformer) => transformer.transform(&data)?,
            None => data,
        };
        accumulator.accumulate(entity_id, &data, None, None)
    }

    fn compute_result(&mut self) -> Result<()> {
        self.result_df = if self.factor_df.height() == 0 {
            empty_frame()?
        } else if let Some(signal) = &self.signal {
            signal.evaluate(&self.factor_df)?
        } else if let Some(scorer) = &self.scorer {
            scorer.score(&self.factor_df)?
        } else {
            self.factor_df.clone()
        };
        info!(factor = %self.name, rows = self.result_df.height(), "compute_result");
        Ok(())
    }

    fn after_compute(&mut self, report: &mut ComputeReport) -> Result<()> {
        if self.writes() {
            if self.persist(report)? {
                self.compute_result()?;
            }
            self.phase = FactorPhase::Persisted;
        }

        if self.config.fill_method == Some(FillMethod::Forward) {
            self.result_df = fill_gap(
                &self.result_df,
                self.config.end_timestamp,
                self.config.effective_number,
            )?;
        }

        if let Some(window) = self.config.keep_window {
            self.factor_df = tail_per_entity(&self.factor_df, window)?;
            self.result_df = tail_per_entity(&self.result_df, window)?;
        }
        info!(factor = %self.name, rows = self.result_df.height(), "after_compute");
        Ok(())
    }

    /// Commit each entity's unpersisted rows with its state. An entity whose commit fails
    /// is rolled back in memory to what is on disk. Returns whether any entity was.
    fn persist(&mut self, report: &mut ComputeReport) -> Result<bool> {
        let mut rolled_back = false;
        for entity_id in self.entity_ids.clone() {
            if report.has_failed(&entity_id) {
                continue;
            }
            let rows = entity_rows(&self.factor_df, &entity_id)?;
            let fresh = match self.persisted_until.get(&entity_id) {
                Some(last) => rows_after_timestamp(&rows, *last)?,
                None => rows.clone(),
            };
            let state = self.states.get(&entity_id);
            if fresh.height() == 0 && state == self.persisted_states.get(&entity_id) {
                continue;
            }
            let encoded = state.map(FactorState::encode).transpose()?;

            match self
                .store
                .commit_entity(&self.name, &entity_id, &fresh, encoded.as_deref())
            {
                Ok(()) => {
                    debug!(
                        factor = %self.name,
                        entity_id = %entity_id,
                        rows = fresh.height(),
                        "persisted"
                    );
                    if let Some(state) = state {
                        self.persisted_states.insert(entity_id.clone(), state.clone());
                    }
                    if let Some(last) = last_timestamps(&fresh)?.remove(&entity_id) {
                        self.persisted_until.insert(entity_id, last);
                    }
                }
                Err(source) => {
                    let err = FactorError::Persistence {
                        entity_id: entity_id.clone(),
                        source,
                    };
                    error!(
                        factor = %self.name,
                        entity_id = %entity_id,
                        error = %err,
                        "rolling back"
                    );
                    report.fail(&entity_id, &err);
                    report.computed.retain(|id| id != &entity_id);
                    report.restarted.retain(|id| id != &entity_id);

                    let kept = slice_rows(&rows, 0, rows.height() - fresh.height());
                    let others = without_entity(&self.factor_df, &entity_id)?;
                    self.factor_df = sort_frame(&concat_aligned(&others, &kept)?)?;
                    match self.persisted_states.get(&entity_id) {
                        Some(state) => self.states.insert(entity_id, state.clone()),
                        None => self.states.remove(&entity_id),
                    };
                    rolled_back = true;
                }
            }
        }
        Ok(rolled_back)
    }
}
