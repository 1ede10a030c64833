//! Linearly decaying lines, week-keyed slope schedules and append-only point logs.
//!
//! Every balance and weight in the crate is a line `bias - slope * (t - ts)` clamped at zero,
//! whose slope changes only at week boundaries recorded in a [`SlopeSchedule`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::math::{add_i128, clamp_to_u128, pro_rata};
use crate::time::{week_ceil, week_floor, BlockNumber, ChainTime, Timestamp, WEEK};
use crate::{CheckpointProgress, Result};

/// `max(bias - slope * dt, 0)` without overflow.
pub fn decay(bias: i128, slope: i128, dt: Timestamp) -> i128 {
    bias.saturating_sub(slope.saturating_mul(i128::from(dt)))
        .max(0)
}

/// A snapshot of a decaying line at `(ts, block)`. Immutable once appended to a log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub bias: i128,
    pub slope: i128,
    pub ts: Timestamp,
    pub block: BlockNumber,
}

impl Point {
    pub fn zero_at(now: ChainTime) -> Point {
        Point {
            bias: 0,
            slope: 0,
            ts: now.ts,
            block: now.block,
        }
    }

    /// Value of the line at `t`, ignoring scheduled slope changes.
    ///
    /// Preconditions:
    /// - `t >= self.ts`; earlier times read the bias at `ts`.
    pub fn value_at(&self, t: Timestamp) -> u128 {
        clamp_to_u128(decay(self.bias, self.slope, t.saturating_sub(self.ts)))
    }
}

/// Sparse map from week boundary to the signed slope delta applied when replay crosses it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlopeSchedule {
    changes: BTreeMap<Timestamp, i128>,
}

impl SlopeSchedule {
    pub fn get(&self, week: Timestamp) -> i128 {
        self.changes.get(&week).copied().unwrap_or(0)
    }

    pub fn set(&mut self, week: Timestamp, delta: i128) {
        if delta == 0 {
            self.changes.remove(&week);
        } else {
            self.changes.insert(week, delta);
        }
    }

    pub fn add(&mut self, week: Timestamp, delta: i128) -> Result<()> {
        let v = add_i128(self.get(week), delta)?;
        self.set(week, v);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, i128)> + '_ {
        self.changes.iter().map(|(k, v)| (*k, *v))
    }

    /// Resulting entries after adding each `(week, delta)` in order, without writing them.
    pub fn plan_adds(&self, deltas: &[(Timestamp, i128)]) -> Result<Vec<(Timestamp, i128)>> {
        let mut out: Vec<(Timestamp, i128)> = Vec::with_capacity(deltas.len());
        for &(week, delta) in deltas {
            match out.iter_mut().find(|(w, _)| *w == week) {
                Some((_, v)) => *v = add_i128(*v, delta)?,
                None => out.push((week, add_i128(self.get(week), delta)?)),
            }
        }
        Ok(out)
    }

    /// Value at `t` of the line through `from`, applying every scheduled change strictly
    /// between `from.ts` and `t`.
    ///
    /// Equivalent to a weekly replay, but only visits weeks that carry a change.
    pub fn project(&self, from: &Point, t: Timestamp) -> u128 {
        if t <= from.ts {
            return clamp_to_u128(from.bias);
        }
        let mut bias = from.bias;
        let mut slope = from.slope;
        let mut ts = from.ts;
        for (&week, &delta) in self.changes.range(from.ts + 1..t) {
            bias = decay(bias, slope, week - ts);
            if bias == 0 {
                return 0;
            }
            slope = slope.saturating_add(delta).max(0);
            ts = week;
        }
        clamp_to_u128(decay(bias, slope, t - ts))
    }
}

/// Result of replaying a global line forward in week steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeeklyReplay {
    /// One point per crossed week boundary strictly before `now`.
    pub weekly: Vec<Point>,
    /// Line at `now` when `caught_up`, else the last weekly point.
    pub head: Point,
    pub caught_up: bool,
}

impl WeeklyReplay {
    pub fn weeks_processed(&self) -> u64 {
        self.weekly.len() as u64
    }
}

/// Steps [`replay_weeks`] needs to carry a point at `from` to `now`: one per week boundary
/// crossed, plus a final partial step when `now` is not itself a boundary.
pub fn weeks_pending(from: Timestamp, now: Timestamp) -> u64 {
    if now <= from {
        return 0;
    }
    (week_ceil(now) - week_floor(from)) / WEEK
}

/// Replays `last` forward to `now` one week at a time, applying scheduled slope deltas and
/// interpolating block numbers linearly between `last` and `now`.
///
/// At most `max_weeks` steps run (the final step to `now` counts as one); the caller decides
/// whether a partial replay is committed or rejected.
pub fn replay_weeks(
    last: &Point,
    now: ChainTime,
    schedule: &SlopeSchedule,
    max_weeks: usize,
) -> WeeklyReplay {
    let mut point = *last;
    let mut weekly = Vec::new();
    let mut t_i = week_floor(last.ts);
    let span_ts = now.ts.saturating_sub(last.ts);
    let span_blocks = now.block.saturating_sub(last.block);

    for _ in 0..max_weeks {
        t_i += WEEK;
        let d_slope = if t_i > now.ts {
            t_i = now.ts;
            0
        } else {
            schedule.get(t_i)
        };

        point.bias = decay(point.bias, point.slope, t_i - point.ts);
        point.slope = point.slope.saturating_add(d_slope).max(0);
        point.ts = t_i;
        let offset = pro_rata(
            u128::from(span_blocks),
            u128::from(t_i - last.ts),
            u128::from(span_ts),
        );
        // offset <= span_blocks, which is a u64.
        point.block = last.block + offset as u64;

        if t_i == now.ts {
            point.block = now.block;
            return WeeklyReplay {
                weekly,
                head: point,
                caught_up: true,
            };
        }
        weekly.push(point);
    }

    WeeklyReplay {
        weekly,
        head: point,
        caught_up: false,
    }
}

/// Append-only log of points ordered by both `ts` and `block`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointLog {
    points: Vec<Point>,
}

impl PointLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, p: Point) {
        debug_assert!(self.last().map_or(true, |l| l.ts <= p.ts && l.block <= p.block));
        self.points.push(p);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Point> {
        self.points.get(idx)
    }

    pub fn first(&self) -> Option<&Point> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> + '_ {
        self.points.iter()
    }

    /// Latest point with `ts <= t`, with its index.
    pub fn at_or_before_ts(&self, t: Timestamp) -> Option<(usize, &Point)> {
        let n = self.points.partition_point(|p| p.ts <= t);
        n.checked_sub(1).map(|i| (i, &self.points[i]))
    }

    /// Latest point with `block <= block`, with its index.
    pub fn at_or_before_block(&self, block: BlockNumber) -> Option<(usize, &Point)> {
        let n = self.points.partition_point(|p| p.block <= block);
        n.checked_sub(1).map(|i| (i, &self.points[i]))
    }

    /// Whether timestamps and blocks are both non-decreasing.
    pub fn is_monotone(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[0].ts <= w[1].ts && w[0].block <= w[1].block)
    }
}

/// Bias and slope of a weekly curve at one week boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub bias: i128,
    pub slope: i128,
}

impl Line {
    pub const ZERO: Line = Line { bias: 0, slope: 0 };

    pub fn is_zero(&self) -> bool {
        self.bias == 0 && self.slope == 0
    }

    /// The line `weeks` week boundaries later with no slope change in between.
    /// A line that runs out on or before the last boundary is zero.
    pub fn advance_weeks(self, weeks: u64) -> Line {
        if weeks == 0 {
            return self;
        }
        let d_bias = self
            .slope
            .saturating_mul(i128::from(WEEK))
            .saturating_mul(i128::from(weeks));
        if self.bias > d_bias {
            Line {
                bias: self.bias - d_bias,
                slope: self.slope,
            }
        } else {
            Line::ZERO
        }
    }

    /// One week step followed by the boundary's slope delta (skipped once the line is zero).
    pub fn step_week(self, delta: i128) -> Line {
        let stepped = self.advance_weeks(1);
        if stepped.is_zero() {
            return Line::ZERO;
        }
        Line {
            bias: stepped.bias,
            slope: stepped.slope.saturating_add(delta).max(0),
        }
    }

    pub fn bias_u128(&self) -> u128 {
        clamp_to_u128(self.bias)
    }
}

/// A decaying aggregate sampled at every week boundary, with a fill cursor.
///
/// Weeks up to `cursor` are materialized; later weeks are projected on read.
/// Writes happen only at the cursor week, which is the next week boundary once the
/// curve has been filled to `now`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyCurve {
    points: BTreeMap<Timestamp, Line>,
    changes: SlopeSchedule,
    cursor: Timestamp,
}

impl WeeklyCurve {
    /// Curve whose first materialized week is `week` (week-aligned, non-zero).
    pub fn seeded(week: Timestamp, line: Line) -> WeeklyCurve {
        let mut points = BTreeMap::new();
        points.insert(week, line);
        WeeklyCurve {
            points,
            changes: SlopeSchedule::default(),
            cursor: week,
        }
    }

    pub fn cursor(&self) -> Timestamp {
        self.cursor
    }

    pub fn is_seeded(&self) -> bool {
        self.cursor != 0
    }

    /// Line at the cursor week (the pending week after a full fill).
    pub fn at_cursor(&self) -> Line {
        self.points.get(&self.cursor).copied().unwrap_or_default()
    }

    pub fn slope_change(&self, week: Timestamp) -> i128 {
        self.changes.get(week)
    }

    pub fn schedule(&self) -> &SlopeSchedule {
        &self.changes
    }

    pub fn materialized(&self) -> impl Iterator<Item = (Timestamp, Line)> + '_ {
        self.points.iter().map(|(k, v)| (*k, *v))
    }

    /// Fill steps needed before the cursor passes `now`.
    pub fn weeks_behind(&self, now: Timestamp) -> u64 {
        if !self.is_seeded() || self.cursor > now {
            return 0;
        }
        (week_floor(now) - self.cursor) / WEEK + 1
    }

    /// Materializes up to `max_weeks` week boundaries after the cursor, stopping at the
    /// first boundary strictly after `now`. The cursor always advances to the last written
    /// week, so repeated calls resume where the previous one stopped.
    pub fn fill(&mut self, now: Timestamp, max_weeks: u64) -> CheckpointProgress {
        if !self.is_seeded() {
            return CheckpointProgress {
                weeks_processed: 0,
                caught_up: true,
            };
        }
        let mut t = self.cursor;
        let mut line = self.at_cursor();
        let mut n = 0;
        while t <= now && n < max_weeks {
            t += WEEK;
            line = line.step_week(self.changes.get(t));
            self.points.insert(t, line);
            n += 1;
        }
        self.cursor = t;
        CheckpointProgress {
            weeks_processed: n,
            caught_up: t > now,
        }
    }

    /// Line at week boundary `week` without mutating the curve.
    pub fn value_at(&self, week: Timestamp) -> Line {
        if !self.is_seeded() {
            return Line::ZERO;
        }
        if week <= self.cursor {
            return self.points.get(&week).copied().unwrap_or_default();
        }
        let mut t = self.cursor;
        let mut line = self.at_cursor();
        for (&k, &delta) in self.changes.changes.range(self.cursor + 1..=week) {
            line = line.advance_weeks((k - t) / WEEK);
            if line.is_zero() {
                return Line::ZERO;
            }
            line.slope = line.slope.saturating_add(delta).max(0);
            t = k;
        }
        line.advance_weeks((week - t) / WEEK)
    }

    /// Overwrites the line at the cursor week.
    pub fn set_pending(&mut self, line: Line) {
        self.points.insert(self.cursor, line);
    }

    pub fn add_change(&mut self, week: Timestamp, delta: i128) -> Result<()> {
        self.changes.add(week, delta)
    }

    /// See [`SlopeSchedule::plan_adds`].
    pub fn plan_changes(&self, deltas: &[(Timestamp, i128)]) -> Result<Vec<(Timestamp, i128)>> {
        self.changes.plan_adds(deltas)
    }

    /// Writes entries produced by [`WeeklyCurve::plan_changes`].
    pub fn apply_changes(&mut self, entries: Vec<(Timestamp, i128)>) {
        for (week, v) in entries {
            self.changes.set(week, v);
        }
    }
}
