//! Weekly fee distributor.
//!
//! Revenue arriving in custody is spread over the weeks elapsed since the last token
//! checkpoint, pro rata by seconds. An account's share of week `W` is its voting balance at
//! `W` over the total voting supply at `W`. Weeks become claimable once they have ended and
//! their total supply has been recorded.


use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::FeeConfig;
use crate::escrow::VotingPowerSource;
use crate::math::{add_u128, pro_rata, sub_u128};
use crate::time::{week_ceil, week_floor, ChainTime, Timestamp, WEEK};
use crate::types::AccountId;
use crate::{CheckpointProgress, Result, VeError};

/// Result of a token checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCheckpoint {
    /// Amount newly assigned to weekly buckets.
    pub distributed: u128,
    pub last_token_time: Timestamp,
    /// `false` when the week cap stopped the walk before `now`.
    pub caught_up: bool,
}

/// Result of a claim for one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimed {
    pub account: AccountId,
    pub amount: u128,
    pub weeks_processed: u64,
    /// First week not yet claimed.
    pub cursor: Timestamp,
}

/// Bucket additions of a token checkpoint, computed before any write.
struct TokenPlan {
    buckets: Vec<(Timestamp, u128)>,
    distributed: u128,
    last_token_time: Timestamp,
    caught_up: bool,
}

/// Weekly supplies to record, computed before any write.
struct SupplyPlan {
    weeks: BTreeMap<Timestamp, u128>,
    cursor: Timestamp,
    caught_up: bool,
}

struct ClaimPlan {
    amount: u128,
    weeks: u64,
    cursor: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDistributor {
    admin: AccountId,
    future_admin: Option<AccountId>,
    emergency_return: AccountId,
    config: FeeConfig,
    clock: ChainTime,
    start_time: Timestamp,
    /// Next week whose total supply is still unrecorded.
    time_cursor: Timestamp,
    last_token_time: Timestamp,
    /// Custody balance already assigned to weekly buckets (minus claims).
    token_last_balance: u128,
    /// Tokens held in custody.
    token_balance: u128,
    tokens_per_week: BTreeMap<Timestamp, u128>,
    ve_supply: BTreeMap<Timestamp, u128>,
    time_cursor_of: BTreeMap<AccountId, Timestamp>,
    can_checkpoint_token: bool,
    is_killed: bool,
    total_received: u128,
    total_claimed: u128,
    emergency_returned: u128,
}

impl FeeDistributor {
    /// New distributor whose first bucket is the week containing `start_time`.
    pub fn new(
        admin: AccountId,
        emergency_return: AccountId,
        start_time: Timestamp,
        config: FeeConfig,
        now: ChainTime,
    ) -> Result<Self> {
        config.validate()?;
        let start = week_floor(start_time);
        Ok(Self {
            admin,
            future_admin: None,
            emergency_return,
            config,
            clock: now,
            start_time: start,
            time_cursor: start,
            last_token_time: start,
            token_last_balance: 0,
            token_balance: 0,
            tokens_per_week: BTreeMap::new(),
            ve_supply: BTreeMap::new(),
            time_cursor_of: BTreeMap::new(),
            can_checkpoint_token: false,
            is_killed: false,
            total_received: 0,
            total_claimed: 0,
            emergency_returned: 0,
        })
    }

    // ---------------------------------------------------------------------
    // Revenue and checkpoints
    // ---------------------------------------------------------------------

    /// Takes `amount` into custody; checkpoints tokens when public checkpoints are open and
    /// the deadline has passed.
    pub fn receive_revenue(&mut self, amount: u128, now: ChainTime) -> Result<Option<TokenCheckpoint>> {
        self.ensure_alive()?;
        self.clock.ensure_not_before(now)?;
        if amount == 0 {
            return Err(VeError::ZeroAmount);
        }
        let balance = add_u128(self.token_balance, amount)?;
        let total_received = add_u128(self.total_received, amount)?;
        let plan = if self.public_checkpoint_due(now.ts) {
            Some(self.plan_token_checkpoint(balance, now.ts)?)
        } else {
            None
        };

        // Commit.
        self.token_balance = balance;
        self.total_received = total_received;
        let report = plan.map(|p| self.apply_token_plan(p));
        self.clock = now;
        info!(amount, balance, checkpointed = report.is_some(), "revenue received");
        Ok(report)
    }

    /// Assigns custody tokens received since the last checkpoint to weekly buckets.
    ///
    /// Preconditions:
    /// - `caller` is the admin, or public checkpoints are open and
    ///   `now > last_token_time + token_checkpoint_deadline_secs`.
    ///
    /// Postconditions:
    /// - the balance diff is spread over `[last_token_time, now)` pro rata by seconds, at
    ///   most `max_token_weeks` weeks; an undistributed tail stays for the next call.
    pub fn checkpoint_token(&mut self, caller: AccountId, now: ChainTime) -> Result<TokenCheckpoint> {
        self.ensure_alive()?;
        self.clock.ensure_not_before(now)?;
        if caller != self.admin && !self.public_checkpoint_due(now.ts) {
            warn!(%caller, "token checkpoint rejected");
            return Err(VeError::Unauthorized(
                "token checkpoint is admin only until opened and due".into(),
            ));
        }
        let plan = self.plan_token_checkpoint(self.token_balance, now.ts)?;

        // Commit.
        let report = self.apply_token_plan(plan);
        self.clock = now;
        Ok(report)
    }

    /// Records total voting supply for each week boundary from the supply cursor up to, but
    /// not including, `now`.
    pub fn checkpoint_total_supply<E: VotingPowerSource + ?Sized>(
        &mut self,
        escrow: &E,
        now: ChainTime,
    ) -> Result<CheckpointProgress> {
        self.clock.ensure_not_before(now)?;
        let plan = self.plan_supply_checkpoint(escrow, now.ts);
        let progress = CheckpointProgress {
            weeks_processed: plan.weeks.len() as u64,
            caught_up: plan.caught_up,
        };

        // Commit.
        self.apply_supply_plan(plan);
        self.clock = now;
        Ok(progress)
    }

    // ---------------------------------------------------------------------
    // Claims
    // ---------------------------------------------------------------------

    /// Pays `account` its share of every finished week since its cursor, up to
    /// `max_claim_weeks` weeks. Returns a zero amount when nothing is claimable.
    pub fn claim<E: VotingPowerSource + ?Sized>(
        &mut self,
        escrow: &E,
        account: AccountId,
        now: ChainTime,
    ) -> Result<Claimed> {
        self.ensure_alive()?;
        self.clock.ensure_not_before(now)?;

        let supply_plan = if now.ts > self.time_cursor {
            Some(self.plan_supply_checkpoint(escrow, now.ts))
        } else {
            None
        };
        let token_plan = if self.public_checkpoint_due(now.ts) {
            Some(self.plan_token_checkpoint(self.token_balance, now.ts)?)
        } else {
            None
        };

        let time_cursor = supply_plan.as_ref().map_or(self.time_cursor, |p| p.cursor);
        let last_token_time = token_plan
            .as_ref()
            .map_or(self.last_token_time, |p| p.last_token_time);
        let bound = week_floor(last_token_time).min(time_cursor);

        let tokens_at = |w: Timestamp| -> u128 {
            let base = self.tokens_per_week.get(&w).copied().unwrap_or(0);
            let added = token_plan
                .as_ref()
                .and_then(|p| p.buckets.iter().find(|(k, _)| *k == w))
                .map_or(0, |(_, v)| *v);
            base.saturating_add(added)
        };
        let supply_at = |w: Timestamp| -> u128 {
            supply_plan
                .as_ref()
                .and_then(|p| p.weeks.get(&w))
                .or_else(|| self.ve_supply.get(&w))
                .copied()
                .unwrap_or(0)
        };
        let claim = self.plan_claim(escrow, account, bound, tokens_at, supply_at);

        let assigned = match &token_plan {
            Some(p) => add_u128(self.token_last_balance, p.distributed)?,
            None => self.token_last_balance,
        };
        if let Some(c) = &claim {
            if c.amount > assigned {
                return Err(VeError::InvariantViolated(format!(
                    "claim of {} exceeds distributed custody {assigned}",
                    c.amount
                )));
            }
        }

        // Commit.
        if let Some(p) = supply_plan {
            self.apply_supply_plan(p);
        }
        if let Some(p) = token_plan {
            self.apply_token_plan(p);
        }
        self.clock = now;
        let Some(c) = claim else {
            return Ok(Claimed {
                account,
                amount: 0,
                weeks_processed: 0,
                cursor: 0,
            });
        };
        self.time_cursor_of.insert(account, c.cursor);
        // amount <= token_last_balance <= token_balance, checked above.
        self.token_last_balance -= c.amount;
        self.token_balance -= c.amount;
        self.total_claimed = self.total_claimed.saturating_add(c.amount);

        if c.amount > 0 {
            info!(%account, amount = c.amount, weeks = c.weeks, cursor = c.cursor, "fees claimed");
        } else {
            debug!(%account, weeks = c.weeks, cursor = c.cursor, "nothing to claim");
        }
        Ok(Claimed {
            account,
            amount: c.amount,
            weeks_processed: c.weeks,
            cursor: c.cursor,
        })
    }

    /// Claims for each of `accounts` in order; all or nothing.
    pub fn claim_many<E: VotingPowerSource + ?Sized>(
        &mut self,
        escrow: &E,
        accounts: &[AccountId],
        now: ChainTime,
    ) -> Result<u128> {
        if accounts.len() > self.config.max_claim_many {
            return Err(VeError::BoundedValueExceeded(format!(
                "claim_many accepts at most {} accounts",
                self.config.max_claim_many
            )));
        }
        let mut staged = self.clone();
        let mut total: u128 = 0;
        for &account in accounts {
            total = add_u128(total, staged.claim(escrow, account, now)?.amount)?;
        }

        // Commit.
        *self = staged;
        Ok(total)
    }

    // ---------------------------------------------------------------------
    // Admin
    // ---------------------------------------------------------------------

    /// Flips whether anyone may trigger token checkpoints. Returns the new setting.
    pub fn toggle_allow_checkpoint_token(&mut self, caller: AccountId) -> Result<bool> {
        self.ensure_admin(caller, "toggle_allow_checkpoint_token")?;
        self.can_checkpoint_token = !self.can_checkpoint_token;
        info!(open = self.can_checkpoint_token, "token checkpoint toggled");
        Ok(self.can_checkpoint_token)
    }

    /// Sends the whole custody balance to the emergency return account and blocks claims
    /// and revenue for good. Returns the amount sent.
    pub fn kill(&mut self, caller: AccountId, now: ChainTime) -> Result<u128> {
        self.ensure_admin(caller, "kill")?;
        self.ensure_alive()?;
        self.clock.ensure_not_before(now)?;
        let amount = self.token_balance;
        let returned = add_u128(self.emergency_returned, amount)?;

        // Commit.
        self.is_killed = true;
        self.token_balance = 0;
        self.token_last_balance = 0;
        self.emergency_returned = returned;
        self.clock = now;
        warn!(amount, to = %self.emergency_return, "fee distributor killed");
        Ok(amount)
    }

    pub fn commit_admin(&mut self, caller: AccountId, new_admin: AccountId) -> Result<()> {
        self.ensure_admin(caller, "commit_admin")?;
        self.future_admin = Some(new_admin);
        info!(%new_admin, "fee admin transfer committed");
        Ok(())
    }

    pub fn apply_admin(&mut self, caller: AccountId) -> Result<()> {
        self.ensure_admin(caller, "apply_admin")?;
        let new_admin = self
            .future_admin
            .ok_or_else(|| VeError::InvalidInput("no admin transfer committed".into()))?;
        self.admin = new_admin;
        self.future_admin = None;
        info!(%new_admin, "fee admin transfer applied");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Voting balance of `account` at `ts` as seen by the distributor.
    pub fn ve_for_at<E: VotingPowerSource + ?Sized>(
        &self,
        escrow: &E,
        account: AccountId,
        ts: Timestamp,
    ) -> u128 {
        escrow.balance_of(account, ts)
    }

    pub fn tokens_per_week(&self, week: Timestamp) -> u128 {
        self.tokens_per_week.get(&week_floor(week)).copied().unwrap_or(0)
    }

    pub fn ve_supply(&self, week: Timestamp) -> u128 {
        self.ve_supply.get(&week_floor(week)).copied().unwrap_or(0)
    }

    pub fn time_cursor_of(&self, account: AccountId) -> Timestamp {
        self.time_cursor_of.get(&account).copied().unwrap_or(0)
    }

    pub fn time_cursor(&self) -> Timestamp {
        self.time_cursor
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn last_token_time(&self) -> Timestamp {
        self.last_token_time
    }

    pub fn token_balance(&self) -> u128 {
        self.token_balance
    }

    pub fn token_last_balance(&self) -> u128 {
        self.token_last_balance
    }

    pub fn total_received(&self) -> u128 {
        self.total_received
    }

    pub fn total_claimed(&self) -> u128 {
        self.total_claimed
    }

    pub fn emergency_returned(&self) -> u128 {
        self.emergency_returned
    }

    /// Sum of all weekly buckets.
    pub fn total_distributed(&self) -> u128 {
        self.tokens_per_week
            .values()
            .fold(0u128, |acc, v| acc.saturating_add(*v))
    }

    pub fn can_checkpoint_token(&self) -> bool {
        self.can_checkpoint_token
    }

    pub fn is_killed(&self) -> bool {
        self.is_killed
    }

    pub fn admin(&self) -> AccountId {
        self.admin
    }

    pub fn emergency_return(&self) -> AccountId {
        self.emergency_return
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    pub fn clock(&self) -> ChainTime {
        self.clock
    }

    // ---------------------------------------------------------------------
    // Internal
    // ---------------------------------------------------------------------

    fn ensure_admin(&self, caller: AccountId, op: &str) -> Result<()> {
        if caller != self.admin {
            warn!(%caller, op, "fee admin call rejected");
            return Err(VeError::Unauthorized(format!("{op} is admin only")));
        }
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_killed {
            return Err(VeError::Killed);
        }
        Ok(())
    }

    fn public_checkpoint_due(&self, now: Timestamp) -> bool {
        self.can_checkpoint_token
            && now > self
                .last_token_time
                .saturating_add(self.config.token_checkpoint_deadline_secs)
    }

    /// Spreads `balance - token_last_balance` over `[last_token_time, now)`.
    fn plan_token_checkpoint(&self, balance: u128, now: Timestamp) -> Result<TokenPlan> {
        let to_distribute = sub_u128(balance, self.token_last_balance)?;
        let t0 = self.last_token_time;
        let since_last = now.saturating_sub(t0);

        // (week, seconds of [t0, end) inside that week)
        let mut segments: Vec<(Timestamp, Timestamp)> = Vec::new();
        let mut t = t0;
        let mut this_week = week_floor(t0);
        let mut caught_up = false;
        while (segments.len() as u64) < self.config.max_token_weeks {
            let next = this_week + WEEK;
            if now < next {
                segments.push((this_week, now - t));
                t = now;
                caught_up = true;
                break;
            }
            segments.push((this_week, next - t));
            t = next;
            this_week = next;
        }
        let end = t;
        let span = end - t0;

        let portion = if caught_up {
            to_distribute
        } else {
            pro_rata(to_distribute, u128::from(span), u128::from(since_last))
        };

        let mut buckets = Vec::with_capacity(segments.len());
        let mut assigned: u128 = 0;
        let last = segments.len().saturating_sub(1);
        for (i, (week, secs)) in segments.into_iter().enumerate() {
            let share = if i == last {
                portion - assigned
            } else {
                pro_rata(portion, u128::from(secs), u128::from(span))
            };
            assigned += share;
            let current = self.tokens_per_week.get(&week).copied().unwrap_or(0);
            buckets.push((week, add_u128(current, share)?));
        }

        Ok(TokenPlan {
            buckets,
            distributed: portion,
            last_token_time: end,
            caught_up,
        })
    }

    fn apply_token_plan(&mut self, plan: TokenPlan) -> TokenCheckpoint {
        for (week, total) in plan.buckets {
            self.tokens_per_week.insert(week, total);
        }
        // distributed <= balance - token_last_balance.
        self.token_last_balance += plan.distributed;
        self.last_token_time = plan.last_token_time;
        info!(
            distributed = plan.distributed,
            last_token_time = plan.last_token_time,
            caught_up = plan.caught_up,
            "token checkpoint"
        );
        TokenCheckpoint {
            distributed: plan.distributed,
            last_token_time: plan.last_token_time,
            caught_up: plan.caught_up,
        }
    }

    fn plan_supply_checkpoint<E: VotingPowerSource + ?Sized>(
        &self,
        escrow: &E,
        now: Timestamp,
    ) -> SupplyPlan {
        // A week is recorded only once it is strictly in the past: a lock landing on
        // `now == t` must still be counted in week `t`'s supply.
        let mut weeks = BTreeMap::new();
        let mut t = self.time_cursor;
        while t < now && (weeks.len() as u64) < self.config.max_supply_weeks {
            weeks.insert(t, escrow.total_supply(t));
            t += WEEK;
        }
        SupplyPlan {
            weeks,
            cursor: t,
            caught_up: t >= now,
        }
    }

    fn apply_supply_plan(&mut self, plan: SupplyPlan) {
        debug!(
            weeks = plan.weeks.len(),
            cursor = plan.cursor,
            caught_up = plan.caught_up,
            "supply checkpoint"
        );
        self.ve_supply.extend(plan.weeks);
        self.time_cursor = plan.cursor;
    }

    /// Walks `account`'s unclaimed weeks strictly before `bound`. `None` when the account has
    /// never held a lock.
    fn plan_claim<E, T, S>(
        &self,
        escrow: &E,
        account: AccountId,
        bound: Timestamp,
        tokens_at: T,
        supply_at: S,
    ) -> Option<ClaimPlan>
    where
        E: VotingPowerSource + ?Sized,
        T: Fn(Timestamp) -> u128,
        S: Fn(Timestamp) -> u128,
    {
        let first = escrow.first_user_point_ts(account)?;
        let last_point = escrow.last_user_point_ts(account).unwrap_or(first);
        let mut week = match self.time_cursor_of.get(&account) {
            Some(c) => *c,
            None => self.start_time.max(week_ceil(first)),
        };

        let mut amount: u128 = 0;
        let mut weeks = 0u64;
        while week < bound && weeks < self.config.max_claim_weeks {
            let balance = escrow.balance_of(account, week);
            if balance == 0 && last_point <= week {
                week = bound;
                break;
            }
            amount = amount.saturating_add(pro_rata(tokens_at(week), balance, supply_at(week)));
            week += WEEK;
            weeks += 1;
        }
        Some(ClaimPlan {
            amount,
            weeks,
            cursor: week,
        })
    }
}
