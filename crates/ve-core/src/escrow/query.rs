use super::{LockedBalance, VotingEscrow};
use crate::decay::{Point, PointLog};
use crate::math::pro_rata;
use crate::time::{BlockNumber, ChainTime, Timestamp};
use crate::types::AccountId;
use crate::{Result, VeError};

/// Read-only view of voting power, consumed by the gauge controller, the fee distributor and
/// external collaborators such as a CDP engine.
pub trait VotingPowerSource {
    /// Voting balance of `account` at `t`.
    fn balance_of(&self, account: AccountId, t: Timestamp) -> u128;

    /// Sum of all voting balances at `t`.
    fn total_supply(&self, t: Timestamp) -> u128;

    /// Slope of the account's most recent point.
    fn last_user_slope(&self, account: AccountId) -> i128;

    /// Unlock time of the account's lock (0 without a lock).
    fn locked_end(&self, account: AccountId) -> Timestamp;

    fn first_user_point_ts(&self, account: AccountId) -> Option<Timestamp>;

    fn last_user_point_ts(&self, account: AccountId) -> Option<Timestamp>;
}

impl VotingEscrow {
    pub fn locked(&self, account: AccountId) -> LockedBalance {
        self.locks.get(&account).copied().unwrap_or_default()
    }

    pub fn locked_end(&self, account: AccountId) -> Timestamp {
        self.locked(account).end
    }

    pub fn locks(&self) -> impl Iterator<Item = (AccountId, LockedBalance)> + '_ {
        self.locks.iter().map(|(a, l)| (*a, *l))
    }

    /// Total tokens held in locks.
    pub fn supply(&self) -> u128 {
        self.supply
    }

    pub fn last_user_slope(&self, account: AccountId) -> i128 {
        self.user_point_history
            .get(&account)
            .and_then(|log| log.last())
            .map_or(0, |p| p.slope)
    }

    /// Number of points in the account's log.
    pub fn user_point_epoch(&self, account: AccountId) -> usize {
        self.user_point_history.get(&account).map_or(0, |log| log.len())
    }

    pub fn user_point_history(&self, account: AccountId, idx: usize) -> Option<Point> {
        self.user_point_history
            .get(&account)
            .and_then(|log| log.get(idx))
            .copied()
    }

    /// Index of the latest global point.
    pub fn epoch(&self) -> usize {
        self.point_history.len().saturating_sub(1)
    }

    pub fn point_history(&self, idx: usize) -> Option<Point> {
        self.point_history.get(idx).copied()
    }

    pub fn global_points(&self) -> &PointLog {
        &self.point_history
    }

    pub fn user_points(&self, account: AccountId) -> Option<&PointLog> {
        self.user_point_history.get(&account)
    }

    pub fn accounts_with_history(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.user_point_history.keys().copied()
    }

    /// Scheduled global slope delta at `week` (negative for lock expiries).
    pub fn slope_change(&self, week: Timestamp) -> i128 {
        self.slope_changes.get(week)
    }

    /// Voting balance of `account` at `t`, from the latest account point at or before `t`.
    pub fn balance_of(&self, account: AccountId, t: Timestamp) -> u128 {
        self.user_point_history
            .get(&account)
            .and_then(|log| log.at_or_before_ts(t))
            .map_or(0, |(_, p)| p.value_at(t))
    }

    /// Voting balance of `account` as of `block`.
    ///
    /// Preconditions:
    /// - `block <= now.block` (else `BlockInFuture`).
    pub fn balance_of_at(
        &self,
        account: AccountId,
        block: BlockNumber,
        now: ChainTime,
    ) -> Result<u128> {
        ensure_block_not_future(block, now)?;
        let Some((_, upoint)) = self
            .user_point_history
            .get(&account)
            .and_then(|log| log.at_or_before_block(block))
        else {
            return Ok(0);
        };
        let t = self.block_time(block, now);
        Ok(upoint.value_at(t))
    }

    /// Sum of all voting balances at `t`, projecting the latest global point through the
    /// slope schedule.
    pub fn total_supply(&self, t: Timestamp) -> u128 {
        self.point_history
            .at_or_before_ts(t)
            .map_or(0, |(_, p)| self.slope_changes.project(p, t))
    }

    /// Sum of all voting balances as of `block`.
    pub fn total_supply_at(&self, block: BlockNumber, now: ChainTime) -> Result<u128> {
        ensure_block_not_future(block, now)?;
        let Some((_, p)) = self.point_history.at_or_before_block(block) else {
            return Ok(0);
        };
        let t = self.block_time(block, now);
        Ok(self.slope_changes.project(p, t))
    }

    /// Estimated timestamp of `block`: linear interpolation between the bracketing global
    /// points, or between the last global point and `now`.
    fn block_time(&self, block: BlockNumber, now: ChainTime) -> Timestamp {
        let Some((idx, p0)) = self.point_history.at_or_before_block(block) else {
            return self.point_history.first().map_or(now.ts, |p| p.ts);
        };
        let (d_t, d_block) = match self.point_history.get(idx + 1) {
            Some(p1) => (p1.ts - p0.ts, p1.block - p0.block),
            None => (
                now.ts.saturating_sub(p0.ts),
                now.block.saturating_sub(p0.block),
            ),
        };
        let offset = pro_rata(
            u128::from(d_t),
            u128::from(block - p0.block),
            u128::from(d_block),
        );
        // offset <= d_t, which is a u64.
        p0.ts + offset as u64
    }
}

fn ensure_block_not_future(block: BlockNumber, now: ChainTime) -> Result<()> {
    if block > now.block {
        return Err(VeError::BlockInFuture {
            block,
            current: now.block,
        });
    }
    Ok(())
}

impl VotingPowerSource for VotingEscrow {
    fn balance_of(&self, account: AccountId, t: Timestamp) -> u128 {
        VotingEscrow::balance_of(self, account, t)
    }

    fn total_supply(&self, t: Timestamp) -> u128 {
        VotingEscrow::total_supply(self, t)
    }

    fn last_user_slope(&self, account: AccountId) -> i128 {
        VotingEscrow::last_user_slope(self, account)
    }

    fn locked_end(&self, account: AccountId) -> Timestamp {
        VotingEscrow::locked_end(self, account)
    }

    fn first_user_point_ts(&self, account: AccountId) -> Option<Timestamp> {
        self.user_points(account)
            .and_then(|log| log.first())
            .map(|p| p.ts)
    }

    fn last_user_point_ts(&self, account: AccountId) -> Option<Timestamp> {
        self.user_points(account)
            .and_then(|log| log.last())
            .map(|p| p.ts)
    }
}
