//! ve-core: vote-escrow tokenomics core.
//!
//! Three cooperating state machines built on one primitive, the linearly decaying
//! [`decay::Point`] with a week-keyed [`decay::SlopeSchedule`]:
//!
//! - [`escrow::VotingEscrow`]: token locks, append-only point logs, current and historical
//!   voting balance queries.
//! - [`gauge::GaugeController`]: gauge registry and per-week relative weights driven by votes.
//! - [`fees::FeeDistributor`]: weekly revenue buckets claimed pro rata to voting balance.
//!
//! [`system::VeSystem`] owns all three and linearizes every state transition through
//! [`system::VeSystem::apply`].
//!
//! The crate is IO-free and deterministic. Callers pass the current [`time::ChainTime`]
//! into every mutating operation.

pub mod config;
pub mod decay;
pub mod escrow;
pub mod fees;
pub mod gauge;
pub mod hash;
pub mod logging;
pub mod math;
pub mod metrics;
pub mod system;
pub mod time;
pub mod types;

pub use config::VeConfig;
pub use escrow::{LockedBalance, VotingEscrow, VotingPowerSource};
pub use fees::FeeDistributor;
pub use gauge::GaugeController;
pub use system::{Action, Outcome, VeSystem};
pub use time::{BlockNumber, ChainTime, Timestamp};
pub use types::{AccountId, Address, GaugeId, GaugeTypeId, VotePower};

use thiserror::Error;

/// 32-byte hash value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Errors returned by every fallible operation in this crate.
///
/// A returned error always means the operation left state untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VeError {
    // Input validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bounded value exceeded: {0}")]
    BoundedValueExceeded(String),

    #[error("Amount must be non-zero")]
    ZeroAmount,

    // Lock lifecycle errors
    #[error("Lock already exists for {account}; withdraw old tokens first")]
    LockExists { account: AccountId },

    #[error("No existing lock found for {account}")]
    NoLock { account: AccountId },

    #[error("Lock for {account} expired at {end}")]
    LockExpired { account: AccountId, end: Timestamp },

    #[error("Lock for {account} does not expire until {end}")]
    LockNotExpired { account: AccountId, end: Timestamp },

    #[error("Unlock time {unlock_time} must be in the future (now {now})")]
    UnlockTimeNotInFuture { unlock_time: Timestamp, now: Timestamp },

    #[error("Unlock time {unlock_time} exceeds the maximum lock horizon {max}")]
    UnlockTimeTooFar { unlock_time: Timestamp, max: Timestamp },

    #[error("Unlock time {unlock_time} does not extend current end {end}")]
    UnlockTimeNotIncreased { unlock_time: Timestamp, end: Timestamp },

    // Voting errors
    #[error("Lock ends at {lock_end}, not after next week boundary {next_week}")]
    LockExpiresTooSoon { lock_end: Timestamp, next_week: Timestamp },

    #[error("Vote cooldown active until {next_allowed}")]
    VoteTooSoon { next_allowed: Timestamp },

    #[error("Vote power budget exceeded: {used} in use, {requested} requested")]
    PowerBudgetExceeded { used: u16, requested: u16 },

    #[error("Unknown gauge {gauge}")]
    UnknownGauge { gauge: GaugeId },

    #[error("Gauge {gauge} already registered")]
    GaugeExists { gauge: GaugeId },

    #[error("Unknown gauge type {type_id}")]
    UnknownGaugeType { type_id: GaugeTypeId },

    // Access control
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Fee distributor is killed")]
    Killed,

    // Time and history errors
    #[error("Clock moved backwards: last {last:?}, now {now:?}")]
    ClockRegression { last: ChainTime, now: ChainTime },

    #[error("Block {block} is in the future (current {current})")]
    BlockInFuture { block: BlockNumber, current: BlockNumber },

    #[error("Checkpoint backlog of {remaining_weeks} weeks; run a checkpoint first")]
    CheckpointBacklog { remaining_weeks: u64 },

    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, VeError>;

/// Progress report of a capped, resumable checkpoint routine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointProgress {
    /// Week boundaries crossed (and materialized) by this call.
    pub weeks_processed: u64,
    /// Whether the routine reached `now`; `false` means call again.
    pub caught_up: bool,
}

impl CheckpointProgress {
    pub fn merge(self, other: CheckpointProgress) -> CheckpointProgress {
        CheckpointProgress {
            weeks_processed: self.weeks_processed + other.weeks_processed,
            caught_up: self.caught_up && other.caught_up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_failing_value() {
        let e = VeError::CheckpointBacklog { remaining_weeks: 300 };
        assert!(e.to_string().contains("300 weeks"));

        let e = VeError::PowerBudgetExceeded {
            used: 9_000,
            requested: 2_000,
        };
        assert_eq!(
            e.to_string(),
            "Vote power budget exceeded: 9000 in use, 2000 requested"
        );
    }

    #[test]
    fn progress_merge_requires_both_caught_up() {
        let a = CheckpointProgress {
            weeks_processed: 3,
            caught_up: true,
        };
        let b = CheckpointProgress {
            weeks_processed: 5,
            caught_up: false,
        };
        let m = a.merge(b);
        assert_eq!(m.weeks_processed, 8);
        assert!(!m.caught_up);
        assert!(a.merge(a).caught_up);
    }

    #[test]
    fn hash32_displays_as_hex() {
        let h = Hash32([0xab; 32]);
        assert_eq!(h.to_string().len(), 64);
        assert!(h.to_string().starts_with("abab"));
    }
}
