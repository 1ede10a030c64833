use serde::{Deserialize, Serialize};

use crate::time::{week_floor, MAX_LOCK_TIME, WEEK};
use crate::types::MAX_VOTE_POWER;
use crate::{Hash32, VeError};

use super::invariant_rail::TimedAction;
use super::VeSystem;

/// Stable identifiers for system invariants (used for testing and counterexamples).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantId {
    /// An action returned `Err` but the state hash changed.
    NoMutationOnError,

    /// A lock has `amount == 0` xor `end == 0`, or an unaligned or too distant end.
    LockShape,

    /// Escrow `supply` differs from the sum of locked amounts.
    LockedSupplyMatchesLocks,

    /// Deposits minus withdrawals differ from the escrow supply.
    TokenConservation,

    /// A point log went backwards in time or block.
    PointLogsMonotone,

    /// Total voting supply drifted from the sum of account balances by more than one unit
    /// per account.
    VotingSupplyMatchesBalances,

    /// A voter's recorded power differs from the sum of its votes or exceeds 10_000.
    VotePowerBudget,

    /// Fee custody: received != held + claimed + returned, or assigned > held.
    FeeCustodyConserved,

    /// Claims exceed what was assigned to weekly buckets.
    FeeClaimsBounded,

    /// An outcome receipt disagrees with the action that produced it.
    ReceiptConsistent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub id: InvariantId,
    pub details: String,
}

impl InvariantViolation {
    pub fn new(id: InvariantId, details: impl Into<String>) -> Self {
        Self {
            id,
            details: details.into(),
        }
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.id, self.details)
    }
}

impl std::error::Error for InvariantViolation {}

impl From<InvariantViolation> for VeError {
    fn from(v: InvariantViolation) -> Self {
        VeError::InvariantViolated(v.to_string())
    }
}

/// A reproducible invariant failure with the action trace that triggers it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantCounterexample {
    pub violation: InvariantViolation,
    /// Index of the first action that leads to a violated invariant.
    pub at_step: usize,
    /// State hash at the time of detection.
    pub state_hash: Hash32,
    /// The action prefix that reproduces the violation (includes the failing step).
    pub actions: Vec<TimedAction>,
}

impl InvariantCounterexample {
    pub fn short(&self) -> String {
        format!(
            "Invariant {:?} violated at step {} (state_hash={})",
            self.violation.id,
            self.at_step,
            hex::encode(self.state_hash.0)
        )
    }
}

type Check = std::result::Result<(), InvariantViolation>;

impl VeSystem {
    /// Checks every state invariant; returns the first violation.
    pub fn check_invariants_v1(&self) -> Check {
        self.check_locks()?;
        self.check_point_logs()?;
        self.check_voting_supply()?;
        self.check_votes()?;
        self.check_fees()
    }

    fn check_locks(&self) -> Check {
        let escrow = &self.escrow;
        let horizon = escrow.clock().ts.saturating_add(MAX_LOCK_TIME);
        let mut sum: u128 = 0;
        for (account, lock) in escrow.locks() {
            let shape_ok = (lock.amount == 0) == (lock.end == 0)
                && lock.end == week_floor(lock.end)
                && lock.end <= horizon;
            if !shape_ok {
                return Err(InvariantViolation::new(
                    InvariantId::LockShape,
                    format!("{account}: amount {} end {}", lock.amount, lock.end),
                ));
            }
            sum = sum.checked_add(lock.amount).ok_or_else(|| {
                InvariantViolation::new(InvariantId::LockedSupplyMatchesLocks, "sum overflows")
            })?;
        }
        if sum != escrow.supply() {
            return Err(InvariantViolation::new(
                InvariantId::LockedSupplyMatchesLocks,
                format!("supply {} != sum of locks {sum}", escrow.supply()),
            ));
        }
        match self.expected_locked() {
            Ok(expected) if expected == escrow.supply() => Ok(()),
            _ => Err(InvariantViolation::new(
                InvariantId::TokenConservation,
                format!(
                    "deposited {} - withdrawn {} != supply {}",
                    self.deposited,
                    self.withdrawn,
                    escrow.supply()
                ),
            )),
        }
    }

    fn check_point_logs(&self) -> Check {
        let escrow = &self.escrow;
        if !escrow.global_points().is_monotone() {
            return Err(InvariantViolation::new(
                InvariantId::PointLogsMonotone,
                "global point log",
            ));
        }
        for account in escrow.accounts_with_history() {
            if !escrow.user_points(account).map_or(true, |log| log.is_monotone()) {
                return Err(InvariantViolation::new(
                    InvariantId::PointLogsMonotone,
                    format!("point log of {account}"),
                ));
            }
        }
        Ok(())
    }

    fn check_voting_supply(&self) -> Check {
        let escrow = &self.escrow;
        let now = escrow.clock().ts;
        // Sample now and a few future week boundaries.
        for t in (0..4).map(|k| week_floor(now) + k * WEEK).chain([now]) {
            let mut sum: u128 = 0;
            let mut n: u128 = 0;
            for account in escrow.accounts_with_history() {
                sum = sum.saturating_add(escrow.balance_of(account, t));
                n += 1;
            }
            let total = escrow.total_supply(t);
            if total.abs_diff(sum) > n {
                return Err(InvariantViolation::new(
                    InvariantId::VotingSupplyMatchesBalances,
                    format!("t={t}: total_supply {total} vs sum of balances {sum}"),
                ));
            }
        }
        Ok(())
    }

    fn check_votes(&self) -> Check {
        let gauges = &self.gauges;
        for voter in gauges.voters() {
            let sum: u32 = gauges
                .votes_of(voter)
                .map(|(_, r)| u32::from(r.power.get()))
                .sum();
            let used = gauges.vote_user_power(voter);
            if sum != u32::from(used) || used > MAX_VOTE_POWER {
                return Err(InvariantViolation::new(
                    InvariantId::VotePowerBudget,
                    format!("{voter}: recorded {used}, sum of votes {sum}"),
                ));
            }
        }
        Ok(())
    }

    fn check_fees(&self) -> Check {
        let fees = &self.fees;
        let accounted = fees
            .token_balance()
            .checked_add(fees.total_claimed())
            .and_then(|v| v.checked_add(fees.emergency_returned()));
        if accounted != Some(fees.total_received()) {
            return Err(InvariantViolation::new(
                InvariantId::FeeCustodyConserved,
                format!(
                    "received {} != balance {} + claimed {} + returned {}",
                    fees.total_received(),
                    fees.token_balance(),
                    fees.total_claimed(),
                    fees.emergency_returned()
                ),
            ));
        }
        if fees.token_last_balance() > fees.token_balance() {
            return Err(InvariantViolation::new(
                InvariantId::FeeCustodyConserved,
                format!(
                    "assigned {} exceeds custody {}",
                    fees.token_last_balance(),
                    fees.token_balance()
                ),
            ));
        }
        let distributed = fees.total_distributed();
        let bounded = if fees.is_killed() {
            fees.total_claimed() <= distributed
        } else {
            fees.token_last_balance().checked_add(fees.total_claimed()) == Some(distributed)
        };
        if !bounded {
            return Err(InvariantViolation::new(
                InvariantId::FeeClaimsBounded,
                format!(
                    "distributed {distributed}, claimed {}, assigned {}",
                    fees.total_claimed(),
                    fees.token_last_balance()
                ),
            ));
        }
        Ok(())
    }
}
