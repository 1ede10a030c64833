//! Gauge weight controller.
//!
//! Voters split their escrow voting power across gauges. Each vote adds a line
//! `slope = user_slope * power / 10_000`, `bias = slope * (lock_end - next_week)` to the gauge's
//! weekly curve and to its type's sum curve, starting at the next week boundary. A gauge's
//! relative weight for week `W` is its bias times its type weight, over the sum of
//! `type_sum * type_weight` across types, all read at `W`.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::GaugeConfig;
use crate::decay::{Line, WeeklyCurve};
use crate::escrow::VotingPowerSource;
use crate::math::{add_i128, add_u128, clamp_to_u128, mul_div_floor, mul_i128, mul_u128, pro_rata, to_i128};
use crate::time::{next_week, week_floor, ChainTime, Timestamp};
use crate::types::{AccountId, GaugeId, GaugeTypeId, VotePower, MAX_VOTE_POWER};
use crate::{CheckpointProgress, Result, VeError};

/// Fixed-point scale of relative weights: `1e18` is the whole emission.
pub const WEIGHT_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Largest accepted type weight multiplier.
pub const MAX_TYPE_WEIGHT: u128 = 1_000_000;

/// A gauge category with its own weight multiplier history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeType {
    pub name: String,
    /// Multiplier in effect from each week boundary on.
    weights: BTreeMap<Timestamp, u128>,
    /// Sum of the weight curves of every gauge of this type.
    sum: WeeklyCurve,
}

impl GaugeType {
    /// Multiplier in effect during week `week` (latest entry at or before it).
    pub fn weight_at(&self, week: Timestamp) -> u128 {
        self.weights
            .range(..=week)
            .next_back()
            .map_or(0, |(_, w)| *w)
    }

    /// Most recently scheduled multiplier.
    pub fn current_weight(&self) -> u128 {
        self.weights.values().next_back().copied().unwrap_or(0)
    }

    pub fn sum_curve(&self) -> &WeeklyCurve {
        &self.sum
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gauge {
    pub type_id: GaugeTypeId,
    pub added_at: Timestamp,
    curve: WeeklyCurve,
}

impl Gauge {
    pub fn curve(&self) -> &WeeklyCurve {
        &self.curve
    }
}

/// An account's standing vote on one gauge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub slope: i128,
    pub power: VotePower,
    /// Voter's lock end when the vote was cast; the contribution expires there.
    pub end: Timestamp,
    pub last_vote: Timestamp,
}

/// Audit record of a vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCast {
    pub voter: AccountId,
    pub gauge: GaugeId,
    pub power: VotePower,
    pub ts: Timestamp,
    pub total_power_used: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeController {
    admin: AccountId,
    future_admin: Option<AccountId>,
    config: GaugeConfig,
    clock: ChainTime,
    types: Vec<GaugeType>,
    gauges: BTreeMap<GaugeId, Gauge>,
    votes: BTreeMap<AccountId, BTreeMap<GaugeId, VoteRecord>>,
    power_used: BTreeMap<AccountId, u16>,
}

impl GaugeController {
    pub fn new(admin: AccountId, config: GaugeConfig, genesis: ChainTime) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            admin,
            future_admin: None,
            config,
            clock: genesis,
            types: Vec::new(),
            gauges: BTreeMap::new(),
            votes: BTreeMap::new(),
            power_used: BTreeMap::new(),
        })
    }

    pub fn admin(&self) -> AccountId {
        self.admin
    }

    pub fn future_admin(&self) -> Option<AccountId> {
        self.future_admin
    }

    pub fn config(&self) -> &GaugeConfig {
        &self.config
    }

    pub fn clock(&self) -> ChainTime {
        self.clock
    }

    // ---------------------------------------------------------------------
    // Admin
    // ---------------------------------------------------------------------

    pub fn commit_transfer_ownership(&mut self, caller: AccountId, new_admin: AccountId) -> Result<()> {
        self.ensure_admin(caller, "commit_transfer_ownership")?;
        self.future_admin = Some(new_admin);
        info!(%new_admin, "gauge admin transfer committed");
        Ok(())
    }

    pub fn apply_transfer_ownership(&mut self, caller: AccountId) -> Result<()> {
        self.ensure_admin(caller, "apply_transfer_ownership")?;
        let new_admin = self
            .future_admin
            .ok_or_else(|| VeError::InvalidInput("no admin transfer committed".into()))?;
        self.admin = new_admin;
        self.future_admin = None;
        info!(%new_admin, "gauge admin transfer applied");
        Ok(())
    }

    /// Registers a gauge type whose multiplier takes effect at the next week boundary.
    pub fn add_gauge_type(
        &mut self,
        caller: AccountId,
        name: impl Into<String>,
        weight: u128,
        now: ChainTime,
    ) -> Result<GaugeTypeId> {
        self.ensure_admin(caller, "add_gauge_type")?;
        self.clock.ensure_not_before(now)?;
        ensure_type_weight(weight)?;
        let id = u32::try_from(self.types.len())
            .map(GaugeTypeId)
            .map_err(|_| VeError::BoundedValueExceeded("too many gauge types".into()))?;
        let next_time = next_week(now.ts);
        let name = name.into();

        // Commit.
        let mut weights = BTreeMap::new();
        weights.insert(next_time, weight);
        self.types.push(GaugeType {
            name: name.clone(),
            weights,
            sum: WeeklyCurve::seeded(next_time, Line::ZERO),
        });
        self.clock = now;
        info!(type_id = %id, name = %name, weight, "gauge type added");
        Ok(id)
    }

    /// Registers `gauge` under `type_id` with an initial admin-set weight (bias), effective at
    /// the next week boundary.
    pub fn add_gauge(
        &mut self,
        caller: AccountId,
        gauge: GaugeId,
        type_id: GaugeTypeId,
        weight: u128,
        now: ChainTime,
    ) -> Result<()> {
        self.ensure_admin(caller, "add_gauge")?;
        self.clock.ensure_not_before(now)?;
        if self.gauges.contains_key(&gauge) {
            return Err(VeError::GaugeExists { gauge });
        }
        let idx = self.type_index(type_id)?;
        self.ensure_fillable(&self.types[idx].sum, now.ts)?;

        let next_time = next_week(now.ts);
        let bias = to_i128(weight)?;
        let sum_line = self.types[idx].sum.value_at(next_time);
        let new_sum = Line {
            bias: add_i128(sum_line.bias, bias)?,
            slope: sum_line.slope,
        };

        // Commit.
        let max = self.config.max_replay_weeks;
        let ty = &mut self.types[idx];
        ty.sum.fill(now.ts, max);
        ty.sum.set_pending(new_sum);
        self.gauges.insert(
            gauge,
            Gauge {
                type_id,
                added_at: now.ts,
                curve: WeeklyCurve::seeded(next_time, Line { bias, slope: 0 }),
            },
        );
        self.clock = now;
        info!(%gauge, type_id = %type_id, weight, "gauge added");
        Ok(())
    }

    /// Schedules a new multiplier for `type_id` from the next week boundary.
    pub fn change_type_weight(
        &mut self,
        caller: AccountId,
        type_id: GaugeTypeId,
        weight: u128,
        now: ChainTime,
    ) -> Result<()> {
        self.ensure_admin(caller, "change_type_weight")?;
        self.clock.ensure_not_before(now)?;
        ensure_type_weight(weight)?;
        let idx = self.type_index(type_id)?;
        let next_time = next_week(now.ts);

        // Commit.
        self.types[idx].weights.insert(next_time, weight);
        self.clock = now;
        info!(type_id = %type_id, weight, effective = next_time, "type weight changed");
        Ok(())
    }

    /// Overrides the bias of `gauge` at the next week boundary, keeping its slope.
    pub fn change_gauge_weight(
        &mut self,
        caller: AccountId,
        gauge: GaugeId,
        weight: u128,
        now: ChainTime,
    ) -> Result<()> {
        self.ensure_admin(caller, "change_gauge_weight")?;
        self.clock.ensure_not_before(now)?;
        let info = self.gauges.get(&gauge).ok_or(VeError::UnknownGauge { gauge })?;
        let idx = self.type_index(info.type_id)?;
        self.ensure_fillable(&info.curve, now.ts)?;
        self.ensure_fillable(&self.types[idx].sum, now.ts)?;

        let next_time = next_week(now.ts);
        let new_bias = to_i128(weight)?;
        let g_line = info.curve.value_at(next_time);
        let s_line = self.types[idx].sum.value_at(next_time);
        let new_gauge = Line {
            bias: new_bias,
            slope: g_line.slope,
        };
        let new_sum = Line {
            bias: add_i128(add_i128(s_line.bias, new_bias)?, -g_line.bias)?.max(0),
            slope: s_line.slope,
        };

        // Commit.
        let max = self.config.max_replay_weeks;
        if let Some(g) = self.gauges.get_mut(&gauge) {
            g.curve.fill(now.ts, max);
            g.curve.set_pending(new_gauge);
        }
        let ty = &mut self.types[idx];
        ty.sum.fill(now.ts, max);
        ty.sum.set_pending(new_sum);
        self.clock = now;
        info!(%gauge, weight, effective = next_time, "gauge weight changed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Voting
    // ---------------------------------------------------------------------

    /// Allocates `power` basis points of `voter`'s escrow slope to `gauge`, replacing the
    /// voter's previous allocation to that gauge.
    ///
    /// Preconditions:
    /// - `gauge` is registered.
    /// - the voter's lock ends after the next week boundary.
    /// - the last vote on this gauge is at least `vote_cooldown_secs` old.
    /// - the voter's total allocated power stays `<= 10_000`.
    ///
    /// Postconditions:
    /// - the previous contribution is removed from the gauge and type curves at the next week
    ///   boundary and from their slope schedules at its end; the new one is added.
    pub fn vote_for_gauge_weights<E: VotingPowerSource + ?Sized>(
        &mut self,
        escrow: &E,
        voter: AccountId,
        gauge: GaugeId,
        power: VotePower,
        now: ChainTime,
    ) -> Result<VoteCast> {
        self.clock.ensure_not_before(now)?;
        let t = now.ts;
        let info = self.gauges.get(&gauge).ok_or(VeError::UnknownGauge { gauge })?;
        let idx = self.type_index(info.type_id)?;

        let user_slope = escrow.last_user_slope(voter);
        let lock_end = escrow.locked_end(voter);
        let next_time = next_week(t);
        if lock_end <= next_time {
            return Err(VeError::LockExpiresTooSoon {
                lock_end,
                next_week: next_time,
            });
        }

        let old = self.vote_record(voter, gauge);
        if let Some(old) = old {
            let next_allowed = old.last_vote.saturating_add(self.config.vote_cooldown_secs);
            if t < next_allowed {
                return Err(VeError::VoteTooSoon { next_allowed });
            }
        }

        let used = self.vote_user_power(voter);
        let old_power = old.map_or(0, |o| o.power.get());
        let new_used = u32::from(used) - u32::from(old_power) + u32::from(power.get());
        if new_used > u32::from(MAX_VOTE_POWER) {
            return Err(VeError::PowerBudgetExceeded {
                used,
                requested: power.get(),
            });
        }
        // Bounded by MAX_VOTE_POWER above.
        let new_used = new_used as u16;

        self.ensure_fillable(&info.curve, t)?;
        self.ensure_fillable(&self.types[idx].sum, t)?;

        let new_slope = to_i128(pro_rata(
            clamp_to_u128(user_slope),
            power.as_u128(),
            u128::from(MAX_VOTE_POWER),
        ))?;
        let new_bias = mul_i128(new_slope, i128::from(lock_end - next_time))?;

        let (old_slope, old_end) = old.map_or((0, 0), |o| (o.slope, o.end));
        let old_bias = if old_end > next_time {
            mul_i128(old_slope, i128::from(old_end - next_time))?
        } else {
            0
        };

        let new_gauge = replace_contribution(
            info.curve.value_at(next_time),
            (old_bias, old_slope),
            (new_bias, new_slope),
            old_end > next_time,
        )?;
        let new_sum = replace_contribution(
            self.types[idx].sum.value_at(next_time),
            (old_bias, old_slope),
            (new_bias, new_slope),
            old_end > next_time,
        )?;

        // Slope schedules hold negated slopes: expiry at lock end, cancellation of the old one.
        let mut deltas = Vec::with_capacity(2);
        if old_end > t {
            deltas.push((old_end, old_slope));
        }
        deltas.push((lock_end, -new_slope));
        let gauge_changes = info.curve.plan_changes(&deltas)?;
        let sum_changes = self.types[idx].sum.plan_changes(&deltas)?;

        // Commit.
        let max = self.config.max_replay_weeks;
        if let Some(g) = self.gauges.get_mut(&gauge) {
            g.curve.fill(t, max);
            g.curve.set_pending(new_gauge);
            g.curve.apply_changes(gauge_changes);
        }
        let ty = &mut self.types[idx];
        ty.sum.fill(t, max);
        ty.sum.set_pending(new_sum);
        ty.sum.apply_changes(sum_changes);

        self.votes.entry(voter).or_default().insert(
            gauge,
            VoteRecord {
                slope: new_slope,
                power,
                end: lock_end,
                last_vote: t,
            },
        );
        self.power_used.insert(voter, new_used);
        self.clock = now;

        info!(
            %voter,
            %gauge,
            power = power.get(),
            total_power_used = new_used,
            ts = t,
            "gauge vote"
        );
        Ok(VoteCast {
            voter,
            gauge,
            power,
            ts: t,
            total_power_used: new_used,
        })
    }

    // ---------------------------------------------------------------------
    // Checkpoints
    // ---------------------------------------------------------------------

    /// Materializes pending weeks of `gauge`'s curve and its type's sum curve.
    pub fn checkpoint_gauge(&mut self, gauge: GaugeId, now: ChainTime) -> Result<CheckpointProgress> {
        self.clock.ensure_not_before(now)?;
        let type_id = self.gauge_type(gauge)?;
        let idx = self.type_index(type_id)?;
        let max = self.config.max_replay_weeks;

        // Commit.
        let mut progress = CheckpointProgress {
            weeks_processed: 0,
            caught_up: true,
        };
        if let Some(g) = self.gauges.get_mut(&gauge) {
            progress = g.curve.fill(now.ts, max);
        }
        progress = progress.merge(self.types[idx].sum.fill(now.ts, max));
        self.clock = now;
        debug!(%gauge, weeks = progress.weeks_processed, caught_up = progress.caught_up, "gauge checkpoint");
        Ok(progress)
    }

    /// Materializes pending weeks of every type sum curve.
    pub fn checkpoint(&mut self, now: ChainTime) -> Result<CheckpointProgress> {
        self.clock.ensure_not_before(now)?;
        let max = self.config.max_replay_weeks;
        let progress = self
            .types
            .iter_mut()
            .map(|ty| ty.sum.fill(now.ts, max))
            .fold(
                CheckpointProgress {
                    weeks_processed: 0,
                    caught_up: true,
                },
                CheckpointProgress::merge,
            );
        self.clock = now;
        debug!(weeks = progress.weeks_processed, caught_up = progress.caught_up, "type checkpoint");
        Ok(progress)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Share of the emission `gauge` receives during the week containing `time`, scaled by
    /// [`WEIGHT_PRECISION`]. Zero when nothing carries weight that week.
    pub fn gauge_relative_weight(&self, gauge: GaugeId, time: Timestamp) -> Result<u128> {
        let week = week_floor(time);
        let info = self.gauges.get(&gauge).ok_or(VeError::UnknownGauge { gauge })?;
        let total = self.total_weight_at(week)?;
        if total == 0 {
            return Ok(0);
        }
        let idx = self.type_index(info.type_id)?;
        let type_weight = self.types[idx].weight_at(week);
        let gauge_bias = info.curve.value_at(week).bias_u128();
        mul_div_floor(mul_u128(type_weight, gauge_bias)?, WEIGHT_PRECISION, total)
    }

    /// [`GaugeController::gauge_relative_weight`] after checkpointing the gauge.
    pub fn gauge_relative_weight_write(
        &mut self,
        gauge: GaugeId,
        time: Timestamp,
        now: ChainTime,
    ) -> Result<u128> {
        self.checkpoint_gauge(gauge, now)?;
        self.checkpoint(now)?;
        self.gauge_relative_weight(gauge, time)
    }

    /// `sum(type_sum(week) * type_weight(week))` over all types: the normalizer of relative
    /// weights for week `week`.
    pub fn total_weight_at(&self, week: Timestamp) -> Result<u128> {
        let week = week_floor(week);
        self.types.iter().try_fold(0u128, |acc, ty| {
            let term = mul_u128(ty.sum.value_at(week).bias_u128(), ty.weight_at(week))?;
            add_u128(acc, term)
        })
    }

    /// Sum over gauges of the pending gauge weight times the current type weight.
    pub fn get_total_weight(&self) -> Result<u128> {
        self.gauges.values().try_fold(0u128, |acc, g| {
            let idx = self.type_index(g.type_id)?;
            let term = mul_u128(g.curve.at_cursor().bias_u128(), self.types[idx].current_weight())?;
            add_u128(acc, term)
        })
    }

    /// Weight (bias) of `gauge` at its latest materialized week.
    pub fn get_gauge_weight(&self, gauge: GaugeId) -> Result<u128> {
        self.gauges
            .get(&gauge)
            .map(|g| g.curve.at_cursor().bias_u128())
            .ok_or(VeError::UnknownGauge { gauge })
    }

    /// Weight (bias) of `gauge` at week boundary `week`.
    pub fn gauge_weight_at(&self, gauge: GaugeId, week: Timestamp) -> Result<u128> {
        self.gauges
            .get(&gauge)
            .map(|g| g.curve.value_at(week_floor(week)).bias_u128())
            .ok_or(VeError::UnknownGauge { gauge })
    }

    pub fn get_type_weight(&self, type_id: GaugeTypeId) -> Result<u128> {
        Ok(self.types[self.type_index(type_id)?].current_weight())
    }

    pub fn type_weight_at(&self, type_id: GaugeTypeId, week: Timestamp) -> Result<u128> {
        Ok(self.types[self.type_index(type_id)?].weight_at(week_floor(week)))
    }

    pub fn get_weights_sum_per_type(&self, type_id: GaugeTypeId) -> Result<u128> {
        Ok(self.types[self.type_index(type_id)?].sum.at_cursor().bias_u128())
    }

    pub fn gauge_type(&self, gauge: GaugeId) -> Result<GaugeTypeId> {
        self.gauges
            .get(&gauge)
            .map(|g| g.type_id)
            .ok_or(VeError::UnknownGauge { gauge })
    }

    pub fn gauge_type_info(&self, type_id: GaugeTypeId) -> Result<&GaugeType> {
        Ok(&self.types[self.type_index(type_id)?])
    }

    pub fn gauge_info(&self, gauge: GaugeId) -> Option<&Gauge> {
        self.gauges.get(&gauge)
    }

    pub fn n_gauge_types(&self) -> usize {
        self.types.len()
    }

    pub fn n_gauges(&self) -> usize {
        self.gauges.len()
    }

    pub fn gauges(&self) -> impl Iterator<Item = GaugeId> + '_ {
        self.gauges.keys().copied()
    }

    /// Power (basis points) `voter` currently has allocated across gauges.
    pub fn vote_user_power(&self, voter: AccountId) -> u16 {
        self.power_used.get(&voter).copied().unwrap_or(0)
    }

    pub fn vote_record(&self, voter: AccountId, gauge: GaugeId) -> Option<VoteRecord> {
        self.votes.get(&voter).and_then(|m| m.get(&gauge)).copied()
    }

    pub fn last_user_vote(&self, voter: AccountId, gauge: GaugeId) -> Timestamp {
        self.vote_record(voter, gauge).map_or(0, |r| r.last_vote)
    }

    pub fn votes_of(&self, voter: AccountId) -> impl Iterator<Item = (GaugeId, VoteRecord)> + '_ {
        self.votes
            .get(&voter)
            .into_iter()
            .flat_map(|m| m.iter().map(|(g, r)| (*g, *r)))
    }

    pub fn voters(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.power_used.keys().copied()
    }

    // ---------------------------------------------------------------------
    // Internal
    // ---------------------------------------------------------------------

    fn ensure_admin(&self, caller: AccountId, op: &str) -> Result<()> {
        if caller != self.admin {
            warn!(%caller, op, "gauge admin call rejected");
            return Err(VeError::Unauthorized(format!("{op} is admin only")));
        }
        Ok(())
    }

    fn type_index(&self, type_id: GaugeTypeId) -> Result<usize> {
        let idx = type_id.0 as usize;
        if idx < self.types.len() {
            Ok(idx)
        } else {
            Err(VeError::UnknownGaugeType { type_id })
        }
    }

    fn ensure_fillable(&self, curve: &WeeklyCurve, now: Timestamp) -> Result<()> {
        let behind = curve.weeks_behind(now);
        if behind > self.config.max_replay_weeks {
            return Err(VeError::CheckpointBacklog {
                remaining_weeks: behind,
            });
        }
        Ok(())
    }
}

fn ensure_type_weight(weight: u128) -> Result<()> {
    if weight > MAX_TYPE_WEIGHT {
        return Err(VeError::InvalidInput(format!(
            "type weight {weight} exceeds {MAX_TYPE_WEIGHT}"
        )));
    }
    Ok(())
}

/// Swaps an old `(bias, slope)` contribution for a new one in `line`, clamping so that a
/// contribution which already decayed away cannot drive the aggregate negative.
fn replace_contribution(
    line: Line,
    (old_bias, old_slope): (i128, i128),
    (new_bias, new_slope): (i128, i128),
    old_still_sloping: bool,
) -> Result<Line> {
    let bias = add_i128(line.bias, new_bias)?.max(old_bias) - old_bias;
    let slope = if old_still_sloping {
        add_i128(line.slope, new_slope)?.max(old_slope) - old_slope
    } else {
        add_i128(line.slope, new_slope)?
    };
    Ok(Line { bias, slope })
}
