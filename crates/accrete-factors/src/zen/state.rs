//! The zen state machine.
//!
//! [`step`] is the pure transition function: it takes the current [`ZenState`] and one
//! bar, and returns the next state together with the [`ZenRow`] reported for that bar.
//! A whole series is processed by folding `step` over its bars after [`bootstrap`] has
//! found the first turning point.
//!
//! Per bar:
//! 1. containment between the bar and the previous (merged) bar is resolved, shrinking
//!    the longer one on the side of the local direction;
//! 2. the local direction is updated;
//! 3. a counter-trend bar increments `opposite_count`; the first one marks the previous
//!    bar as a temporary extremum, which replaces the candidate when at least as extreme;
//! 4. on a counter-trend bar the candidate is confirmed as a turning point once
//!    `opposite_count` reaches [`CONFIRM_OPPOSITE`] or the bar lies
//!    [`CONFIRM_DISTANCE`] bars past the candidate;
//! 5. confirmed turning points feed stroke centers and segment detection, and confirmed
//!    segment boundaries feed segment centers.
//!
//! Events are reported on the bar at which they become known, with `*_index` fields
//! pointing at the bar they refer to.

use crate::algorithm::intersect;
use crate::zen::model::{Direction, DuanState, Fenxing, FenxingKind, KBar, Leg, Point, Rect};
use serde::{Deserialize, Serialize};

/// Counter-trend bars that confirm a candidate turning point.
pub const CONFIRM_OPPOSITE: usize = 4;

/// Distance in bars from the candidate that confirms it.
pub const CONFIRM_DISTANCE: usize = 8;

/// Bars scanned before the first turning point is searched for.
pub const MIN_BOOTSTRAP_BARS: usize = 11;

/// Minimum distance between the extreme high and low of the bootstrap window.
pub const BOOTSTRAP_SPAN: usize = 4;

/// Points kept to test for a center or a segment.
const WINDOW: usize = 4;

/// State carried from one bar to the next, and between incremental batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZenState {
    /// Direction of the running stroke; its end is the turning point being hunted
    pub direction: Direction,
    /// Direction of the last bar relative to the one before
    pub local_direction: Direction,
    /// Consecutive counter-trend bars
    pub opposite_count: usize,
    /// Best unconfirmed turning point
    pub candidate_extremum: Option<Fenxing>,
    /// Last confirmed turning points, for segment detection
    pub confirmed_fenxing_window: Vec<Fenxing>,
    /// Last segment endpoints, for segment-level centers
    pub centers: Vec<Point>,
    /// Last stroke endpoints, for stroke-level centers
    pub bi_points: Vec<Point>,
    /// Running segment direction
    pub duan_state: DuanState,
    /// Last stroke endpoint
    pub pre_bi: Option<Point>,
    /// Last segment endpoint
    pub pre_duan: Option<Point>,
    /// Previous bar, after merging
    pub pre_bar: KBar,
    /// Bar before `pre_bar`
    pub pre_pre_bar: Option<KBar>,
    /// Position of the next bar
    pub next_index: usize,
}

/// Everything reported for one bar.
///
/// Rows before the first turning point are all-missing; processed rows carry `false`
/// flags and the running direction and segment state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZenRow {
    /// Running stroke direction
    pub direction: Option<Direction>,
    /// A top was confirmed on this bar
    pub bi_ding: Option<bool>,
    /// A bottom was confirmed on this bar
    pub bi_di: Option<bool>,
    /// The previous bar is a temporary top
    pub tmp_ding: Option<bool>,
    /// The previous bar is a temporary bottom
    pub tmp_di: Option<bool>,
    /// Strength of the temporary extremum
    pub fenxing_power: Option<f64>,
    /// Position of the confirmed turning point
    pub bi_index: Option<usize>,
    /// Price of the confirmed turning point
    pub bi_value: Option<f64>,
    /// Stroke ending at the confirmed turning point
    pub bi: Option<Leg>,
    /// Running segment state
    pub duan_state: Option<DuanState>,
    /// Segment boundary confirmed on this bar
    pub duan: Option<Point>,
    /// Segment ending at the boundary
    pub duan_leg: Option<Leg>,
    /// Stroke-level center confirmed on this bar
    pub bi_zhongshu: Option<Rect>,
    /// Segment-level center confirmed on this bar
    pub zhongshu: Option<Rect>,
}

impl ZenRow {
    fn processed(state: &ZenState) -> Self {
        Self {
            direction: Some(state.direction),
            bi_ding: Some(false),
            bi_di: Some(false),
            tmp_ding: Some(false),
            tmp_di: Some(false),
            duan_state: Some(state.duan_state),
            ..Self::default()
        }
    }

    fn mark_fenxing(&mut self, fenxing: &Fenxing) {
        match fenxing.state {
            FenxingKind::BiDing => self.bi_ding = Some(true),
            FenxingKind::BiDi => self.bi_di = Some(true),
        }
        self.bi_index = Some(fenxing.index);
        self.bi_value = Some(fenxing.value());
    }
}

/// Outcome of containment resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Neither bar covers the other
    None,
    /// The new bar covers the previous one and was shrunk
    BarIncludesPre,
    /// The previous bar covers the new one and was shrunk
    PreIncludesBar,
}

/// Resolve containment between two consecutive bars.
///
/// The longer bar is shrunk to the shorter one's bound: with `direction` up its low is
/// raised to the shorter bar's low, with `direction` down its high is lowered to the
/// shorter bar's high. In an up move `pre` = (high 10, low 5) followed by `bar` =
/// (high 9, low 6) therefore merges to low 6.
pub fn resolve_containment(pre: &mut KBar, bar: &mut KBar, direction: Direction) -> Containment {
    if bar.includes(pre) {
        match direction {
            Direction::Up => bar.low = pre.low,
            Direction::Down => bar.high = pre.high,
        }
        Containment::BarIncludesPre
    } else if pre.includes(bar) {
        match direction {
            Direction::Up => pre.low = bar.low,
            Direction::Down => pre.high = bar.high,
        }
        Containment::PreIncludesBar
    } else {
        Containment::None
    }
}

/// Direction of `bar` relative to `pre`; `current` when it makes neither a higher high
/// nor a lower low.
pub fn local_direction(pre: &KBar, bar: &KBar, current: Direction) -> Direction {
    if bar.high > pre.high {
        Direction::Up
    } else if bar.low < pre.low {
        Direction::Down
    } else {
        current
    }
}

/// Strength of a temporary extremum at `middle`, from its neighbours and its close.
/// Negative for tops, positive for bottoms.
pub fn fenxing_power(left: &KBar, middle: &KBar, right: &KBar, kind: FenxingKind) -> Option<f64> {
    if middle.close == 0.0 {
        return None;
    }
    match kind {
        FenxingKind::BiDing => {
            let a = middle.high - middle.close;
            let b = middle.high - left.high;
            let c = middle.high - right.high;
            Some(-(a + b + c) / middle.close)
        }
        FenxingKind::BiDi => {
            let a = (middle.low - middle.close).abs();
            let b = (middle.low - left.low).abs();
            let c = (middle.low - right.low).abs();
            Some((a + b + c) / middle.close)
        }
    }
}

/// Center of four alternating endpoints: the intersection of the first and the last
/// pair's price ranges.
pub fn detect_zhongshu(points: &[Point]) -> Option<Rect> {
    let [p0, p1, p2, p3] = points else {
        return None;
    };
    let (a, b) = if p0.value < p1.value {
        ((p0.value, p1.value), (p2.value, p3.value))
    } else {
        ((p1.value, p0.value), (p3.value, p2.value))
    };
    intersect(a, b).map(|(y0, y1)| Rect {
        x0: p0.index,
        x1: p3.index,
        y0,
        y1,
    })
}

/// Segment direction from four alternating turning points: overlapping first and third
/// strokes confirm a segment in the direction of the first stroke. Otherwise `previous`.
pub fn detect_duan(window: &[Fenxing], previous: DuanState) -> DuanState {
    let [f0, f1, f2, f3] = window else {
        return previous;
    };
    match f0.state {
        FenxingKind::BiDing => {
            let range1 = (f1.kdata.low, f0.kdata.high);
            let range3 = (f3.kdata.low, f2.kdata.high);
            if intersect(range1, range3).is_some() {
                return DuanState::Down;
            }
        }
        FenxingKind::BiDi => {
            let range1 = (f0.kdata.low, f1.kdata.high);
            let range3 = (f2.kdata.low, f3.kdata.high);
            if intersect(range1, range3).is_some() {
                return DuanState::Up;
            }
        }
    }
    previous
}

fn push_point(points: &mut Vec<Point>, point: Point) -> Option<Rect> {
    points.push(point);
    if points.len() < WINDOW {
        return None;
    }
    match detect_zhongshu(points) {
        Some(rect) => {
            let keep = points.len() - 1;
            points.drain(..keep);
            Some(rect)
        }
        None => {
            points.remove(0);
            None
        }
    }
}

/// First turning point of a series.
///
/// Scans growing prefixes of at least `min_step` bars until the last highest high and the
/// last lowest low lie [`BOOTSTRAP_SPAN`] or more bars apart; the earlier of the two is the
/// turning point. Returns it with the direction of the stroke it starts and the position
/// of the later extreme.
pub fn first_fenxing(bars: &[KBar], min_step: usize) -> Option<(Fenxing, Direction, usize)> {
    let mut step = min_step.max(1);
    while step <= bars.len() {
        let window = &bars[..step];
        let mut ding = 0;
        let mut di = 0;
        for (i, bar) in window.iter().enumerate() {
            if bar.high >= window[ding].high {
                ding = i;
            }
            if bar.low <= window[di].low {
                di = i;
            }
        }
        if ding.abs_diff(di) >= BOOTSTRAP_SPAN {
            return Some(if di < ding {
                (Fenxing::at(FenxingKind::BiDi, &bars[di]), Direction::Up, ding)
            } else {
                (Fenxing::at(FenxingKind::BiDing, &bars[ding]), Direction::Down, di)
            });
        }
        step += 1;
    }
    None
}

/// Establish the initial state from the first bars of a series.
///
/// Returns the state after the bar at the returned position and the row reported there,
/// which carries the bootstrap turning point. Bars before that position report nothing.
/// `None` when no turning point can be found yet.
pub fn bootstrap(bars: &[KBar], min_step: usize) -> Option<(ZenState, usize, ZenRow)> {
    let (first, direction, start) = first_fenxing(bars, min_step)?;
    let point = first.point();
    let state = ZenState {
        direction,
        local_direction: direction,
        opposite_count: 0,
        candidate_extremum: None,
        confirmed_fenxing_window: vec![first],
        centers: Vec::new(),
        bi_points: vec![point],
        duan_state: DuanState::Yi,
        pre_bi: Some(point),
        pre_duan: None,
        pre_bar: bars[start],
        pre_pre_bar: start.checked_sub(1).map(|p| bars[p]),
        next_index: bars[start].index + 1,
    };
    let mut row = ZenRow::processed(&state);
    row.mark_fenxing(&first);
    Some((state, start, row))
}

impl ZenState {
    fn confirm(&mut self, fenxing: Fenxing, row: &mut ZenRow) {
        row.mark_fenxing(&fenxing);
        let point = fenxing.point();
        row.bi = self.pre_bi.map(|pre| Leg::between(&pre, &point));
        self.pre_bi = Some(point);
        row.bi_zhongshu = push_point(&mut self.bi_points, point);

        self.direction = self.direction.opposite();
        self.opposite_count = 0;
        self.candidate_extremum = None;

        self.confirmed_fenxing_window.push(fenxing);
        if self.confirmed_fenxing_window.len() < WINDOW {
            return;
        }
        let detected = detect_duan(&self.confirmed_fenxing_window, self.duan_state);
        if detected == self.duan_state {
            self.confirmed_fenxing_window.remove(0);
            return;
        }

        self.duan_state = detected;
        let boundary = self.confirmed_fenxing_window[0].point();
        row.duan = Some(boundary);
        row.duan_leg = self.pre_duan.map(|pre| Leg::between(&pre, &boundary));
        self.pre_duan = Some(boundary);
        row.zhongshu = push_point(&mut self.centers, boundary);

        let keep = self.confirmed_fenxing_window.len() - 1;
        self.confirmed_fenxing_window.drain(..keep);
    }

    /// Structural problems that make the state unusable, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.confirmed_fenxing_window.is_empty()
            || self.confirmed_fenxing_window.len() >= WINDOW
        {
            return Err(format!(
                "{} confirmed turning points in the window",
                self.confirmed_fenxing_window.len()
            ));
        }
        if self.bi_points.len() >= WINDOW || self.centers.len() >= WINDOW {
            return Err("too many pending center points".to_string());
        }
        if self.pre_bar.index >= self.next_index {
            return Err(format!(
                "previous bar {} is not before next bar {}",
                self.pre_bar.index, self.next_index
            ));
        }
        if let Some(candidate) = &self.candidate_extremum
            && (candidate.index >= self.next_index || candidate.state != self.direction.hunted())
        {
            return Err("candidate does not match the running stroke".to_string());
        }
        Ok(())
    }
}

/// Advance the state machine by one bar.
pub fn step(mut state: ZenState, bar: KBar) -> (ZenState, ZenRow) {
    let mut bar = bar;
    let mut pre = state.pre_bar;
    let containment = resolve_containment(&mut pre, &mut bar, state.local_direction);

    state.local_direction = local_direction(&pre, &bar, state.local_direction);
    let mut row = ZenRow::processed(&state);

    if state.local_direction == state.direction {
        state.opposite_count = 0;
    } else {
        state.opposite_count += 1;
        if state.opposite_count == 1 {
            let tmp = Fenxing::at(state.direction.hunted(), &pre);
            match tmp.state {
                FenxingKind::BiDing => row.tmp_ding = Some(true),
                FenxingKind::BiDi => row.tmp_di = Some(true),
            }
            row.fenxing_power = state
                .pre_pre_bar
                .and_then(|left| fenxing_power(&left, &pre, &bar, tmp.state));
            if state
                .candidate_extremum
                .is_none_or(|candidate| tmp.at_least_as_extreme(&candidate))
            {
                state.candidate_extremum = Some(tmp);
            }
        }
        if let Some(candidate) = state.candidate_extremum
            && (state.opposite_count >= CONFIRM_OPPOSITE
                || bar.index - candidate.index >= CONFIRM_DISTANCE)
        {
            state.confirm(candidate, &mut row);
        }
    }

    match containment {
        Containment::PreIncludesBar => state.pre_bar = pre,
        Containment::None | Containment::BarIncludesPre => {
            state.pre_pre_bar = Some(pre);
            state.pre_bar = bar;
        }
    }
    state.next_index = bar.index + 1;
    row.direction = Some(state.direction);
    row.duan_state = Some(state.duan_state);
    (state, row)
}
