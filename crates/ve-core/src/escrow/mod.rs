//! Escrow ledger: token locks and their decaying voting balances.
//!
//! A lock of `amount` ending at `end` contributes the line
//! `slope = amount / MAX_LOCK_TIME`, `bias = slope * (end - now)`. The global line is the sum of
//! all account lines; it is kept as an append-only point log plus a schedule of slope decreases
//! at lock end weeks, and is replayed week by week on every checkpoint.

mod query;

pub use query::VotingPowerSource;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use crate::config::EscrowConfig;
use crate::decay::{replay_weeks, weeks_pending, Line, Point, PointLog, SlopeSchedule, WeeklyReplay};
use crate::math::{add_i128, add_u128, mul_i128, sub_u128, to_i128};
use crate::time::{week_floor, ChainTime, Timestamp, MAX_LOCK_TIME};
use crate::types::AccountId;
use crate::{CheckpointProgress, Result, VeError};

/// Locked tokens and the week-aligned unlock time. `amount == 0` iff `end == 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedBalance {
    pub amount: u128,
    pub end: Timestamp,
}

impl LockedBalance {
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }

    /// Voting line of this lock as seen at `now`; zero once expired.
    pub fn line_at(&self, now: Timestamp) -> Result<Line> {
        if self.amount == 0 || self.end <= now {
            return Ok(Line::ZERO);
        }
        let slope = to_i128(self.amount)? / i128::from(MAX_LOCK_TIME);
        let bias = mul_i128(slope, i128::from(self.end - now))?;
        Ok(Line { bias, slope })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositKind {
    DepositFor,
    CreateLock,
    IncreaseLockAmount,
    IncreaseUnlockTime,
}

/// Audit record of a lock creation or modification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReceipt {
    pub account: AccountId,
    pub value: u128,
    pub unlock_time: Timestamp,
    pub kind: DepositKind,
    pub ts: Timestamp,
    pub supply_before: u128,
    pub supply_after: u128,
}

/// Audit record of a withdrawal of an expired lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub account: AccountId,
    pub value: u128,
    pub ts: Timestamp,
    pub supply_before: u128,
    pub supply_after: u128,
}

/// A lock transition to fold into the global line.
struct LockChange {
    account: AccountId,
    old: LockedBalance,
    new: LockedBalance,
}

/// Every write a checkpoint will make, computed before any of them happen.
struct CheckpointPlan {
    replay: WeeklyReplay,
    slope_writes: Vec<(Timestamp, i128)>,
    user_point: Option<(AccountId, Point)>,
}

/// The escrow ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingEscrow {
    config: EscrowConfig,
    clock: ChainTime,
    /// Sum of all locked amounts.
    supply: u128,
    locks: BTreeMap<AccountId, LockedBalance>,
    point_history: PointLog,
    user_point_history: BTreeMap<AccountId, PointLog>,
    slope_changes: SlopeSchedule,
}

impl VotingEscrow {
    /// New ledger whose global log starts with a zero point at `genesis`.
    pub fn new(config: EscrowConfig, genesis: ChainTime) -> Result<Self> {
        config.validate()?;
        let mut point_history = PointLog::new();
        point_history.push(Point::zero_at(genesis));
        Ok(Self {
            config,
            clock: genesis,
            supply: 0,
            locks: BTreeMap::new(),
            point_history,
            user_point_history: BTreeMap::new(),
            slope_changes: SlopeSchedule::default(),
        })
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn clock(&self) -> ChainTime {
        self.clock
    }

    /// Locks `amount` until `unlock_time` (rounded down to a week boundary).
    ///
    /// Preconditions:
    /// - `amount > 0`; the account holds no lock, not even an expired one.
    /// - `now < week_floor(unlock_time) <= now + MAX_LOCK_TIME`.
    pub fn create_lock(
        &mut self,
        account: AccountId,
        amount: u128,
        unlock_time: Timestamp,
        now: ChainTime,
    ) -> Result<LockReceipt> {
        self.clock.ensure_not_before(now)?;
        let unlock_time = week_floor(unlock_time);
        let old = self.locked(account);

        if amount == 0 {
            return Err(VeError::ZeroAmount);
        }
        if !old.is_empty() {
            return Err(VeError::LockExists { account });
        }
        if unlock_time <= now.ts {
            return Err(VeError::UnlockTimeNotInFuture {
                unlock_time,
                now: now.ts,
            });
        }
        let max = now.ts.saturating_add(MAX_LOCK_TIME);
        if unlock_time > max {
            return Err(VeError::UnlockTimeTooFar { unlock_time, max });
        }

        self.deposit(account, amount, Some(unlock_time), old, DepositKind::CreateLock, now)
    }

    /// Adds `amount` to an existing, unexpired lock of `account` without changing its end.
    /// Anyone may fund anyone's lock this way.
    pub fn deposit_for(
        &mut self,
        account: AccountId,
        amount: u128,
        now: ChainTime,
    ) -> Result<LockReceipt> {
        self.top_up(account, amount, DepositKind::DepositFor, now)
    }

    /// Adds `amount` to the caller's own unexpired lock.
    pub fn increase_amount(
        &mut self,
        account: AccountId,
        amount: u128,
        now: ChainTime,
    ) -> Result<LockReceipt> {
        self.top_up(account, amount, DepositKind::IncreaseLockAmount, now)
    }

    /// Extends an unexpired lock to `unlock_time` (rounded down to a week boundary).
    ///
    /// Preconditions:
    /// - the rounded time is strictly later than the current end and at most
    ///   `now + MAX_LOCK_TIME`.
    pub fn increase_unlock_time(
        &mut self,
        account: AccountId,
        unlock_time: Timestamp,
        now: ChainTime,
    ) -> Result<LockReceipt> {
        self.clock.ensure_not_before(now)?;
        let unlock_time = week_floor(unlock_time);
        let old = self.locked(account);

        if old.is_empty() {
            return Err(VeError::NoLock { account });
        }
        if old.end <= now.ts {
            return Err(VeError::LockExpired {
                account,
                end: old.end,
            });
        }
        if unlock_time <= old.end {
            return Err(VeError::UnlockTimeNotIncreased {
                unlock_time,
                end: old.end,
            });
        }
        let max = now.ts.saturating_add(MAX_LOCK_TIME);
        if unlock_time > max {
            return Err(VeError::UnlockTimeTooFar { unlock_time, max });
        }

        self.deposit(account, 0, Some(unlock_time), old, DepositKind::IncreaseUnlockTime, now)
    }

    /// Releases an expired lock and returns its amount.
    pub fn withdraw(&mut self, account: AccountId, now: ChainTime) -> Result<WithdrawReceipt> {
        self.clock.ensure_not_before(now)?;
        let old = self.locked(account);
        if old.is_empty() {
            return Err(VeError::NoLock { account });
        }
        if now.ts < old.end {
            return Err(VeError::LockNotExpired {
                account,
                end: old.end,
            });
        }

        let supply_before = self.supply;
        let supply_after = sub_u128(supply_before, old.amount)?;
        let plan = self.plan_checkpoint(
            Some(LockChange {
                account,
                old,
                new: LockedBalance::default(),
            }),
            now,
        )?;

        // Commit.
        self.supply = supply_after;
        self.locks.remove(&account);
        self.commit(plan, now);

        info!(%account, value = old.amount, supply = supply_after, "escrow withdraw");
        Ok(WithdrawReceipt {
            account,
            value: old.amount,
            ts: now.ts,
            supply_before,
            supply_after,
        })
    }

    /// Materializes pending weekly global points, at most `max_replay_weeks` per call.
    ///
    /// Never fails on backlog: a partial replay is committed and reported, and the next
    /// call resumes from the last written week.
    #[instrument(level = "debug", skip(self))]
    pub fn checkpoint(&mut self, now: ChainTime) -> Result<CheckpointProgress> {
        self.clock.ensure_not_before(now)?;
        let plan = self.plan_checkpoint(None, now)?;
        let progress = CheckpointProgress {
            weeks_processed: plan.replay.weeks_processed(),
            caught_up: plan.replay.caught_up,
        };
        self.commit(plan, now);
        debug!(
            weeks = progress.weeks_processed,
            caught_up = progress.caught_up,
            "escrow checkpoint"
        );
        Ok(progress)
    }

    /// Weeks of global replay outstanding at `now`.
    pub fn pending_weeks(&self, now: Timestamp) -> u64 {
        weeks_pending(self.last_point().ts, now)
    }

    fn top_up(
        &mut self,
        account: AccountId,
        amount: u128,
        kind: DepositKind,
        now: ChainTime,
    ) -> Result<LockReceipt> {
        self.clock.ensure_not_before(now)?;
        let old = self.locked(account);
        if amount == 0 {
            return Err(VeError::ZeroAmount);
        }
        if old.is_empty() {
            return Err(VeError::NoLock { account });
        }
        if old.end <= now.ts {
            return Err(VeError::LockExpired {
                account,
                end: old.end,
            });
        }
        self.deposit(account, amount, None, old, kind, now)
    }

    fn deposit(
        &mut self,
        account: AccountId,
        value: u128,
        unlock_time: Option<Timestamp>,
        old: LockedBalance,
        kind: DepositKind,
        now: ChainTime,
    ) -> Result<LockReceipt> {
        let supply_before = self.supply;
        let supply_after = add_u128(supply_before, value)?;
        let new = LockedBalance {
            amount: add_u128(old.amount, value)?,
            end: unlock_time.unwrap_or(old.end),
        };
        let plan = self.plan_checkpoint(Some(LockChange { account, old, new }), now)?;

        // Commit.
        self.supply = supply_after;
        self.locks.insert(account, new);
        self.commit(plan, now);

        info!(
            %account,
            value,
            unlock_time = new.end,
            kind = ?kind,
            supply = supply_after,
            "escrow deposit"
        );
        Ok(LockReceipt {
            account,
            value,
            unlock_time: new.end,
            kind,
            ts: now.ts,
            supply_before,
            supply_after,
        })
    }

    fn last_point(&self) -> Point {
        self.point_history
            .last()
            .copied()
            .unwrap_or_else(|| Point::zero_at(self.clock))
    }

    /// Replays the global line to `now` and folds in `change`.
    ///
    /// With a change, an incomplete replay is rejected with `CheckpointBacklog`.
    fn plan_checkpoint(&self, change: Option<LockChange>, now: ChainTime) -> Result<CheckpointPlan> {
        let last = self.last_point();
        let max_weeks = usize::try_from(self.config.max_replay_weeks).unwrap_or(usize::MAX);
        let mut replay = replay_weeks(&last, now, &self.slope_changes, max_weeks);

        let Some(LockChange { account, old, new }) = change else {
            return Ok(CheckpointPlan {
                replay,
                slope_writes: Vec::new(),
                user_point: None,
            });
        };

        if !replay.caught_up {
            return Err(VeError::CheckpointBacklog {
                remaining_weeks: weeks_pending(last.ts, now.ts),
            });
        }

        let u_old = old.line_at(now.ts)?;
        let u_new = new.line_at(now.ts)?;

        let head = &mut replay.head;
        head.slope = add_i128(head.slope, add_i128(u_new.slope, -u_old.slope)?)?.max(0);
        head.bias = add_i128(head.bias, add_i128(u_new.bias, -u_old.bias)?)?.max(0);

        // Slope changes are stored negated: crossing a lock's end week adds them.
        let mut slope_writes = Vec::with_capacity(2);
        let mut old_dslope = self.slope_changes.get(old.end);
        let mut new_dslope = if new.end == 0 {
            0
        } else if new.end == old.end {
            old_dslope
        } else {
            self.slope_changes.get(new.end)
        };
        if old.end > now.ts {
            old_dslope = add_i128(old_dslope, u_old.slope)?;
            if new.end == old.end {
                old_dslope = add_i128(old_dslope, -u_new.slope)?;
            }
            slope_writes.push((old.end, old_dslope));
        }
        if new.end > now.ts && new.end > old.end {
            new_dslope = add_i128(new_dslope, -u_new.slope)?;
            slope_writes.push((new.end, new_dslope));
        }

        Ok(CheckpointPlan {
            replay,
            slope_writes,
            user_point: Some((
                account,
                Point {
                    bias: u_new.bias,
                    slope: u_new.slope,
                    ts: now.ts,
                    block: now.block,
                },
            )),
        })
    }

    fn commit(&mut self, plan: CheckpointPlan, now: ChainTime) {
        let CheckpointPlan {
            replay,
            slope_writes,
            user_point,
        } = plan;
        for p in replay.weekly {
            self.point_history.push(p);
        }
        if replay.caught_up {
            self.point_history.push(replay.head);
        }
        for (week, delta) in slope_writes {
            self.slope_changes.set(week, delta);
        }
        if let Some((account, p)) = user_point {
            self.user_point_history.entry(account).or_default().push(p);
        }
        self.clock = now;
    }
}
