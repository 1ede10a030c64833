//! Time units and the caller-supplied chain clock.

use serde::{Deserialize, Serialize};

use crate::{Result, VeError};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Monotone block height.
pub type BlockNumber = u64;

pub const DAY: Timestamp = 86_400;
pub const WEEK: Timestamp = 7 * DAY;
pub const YEAR: Timestamp = 365 * DAY;

/// Longest permitted lock, measured from the moment of the lock or extension.
pub const MAX_LOCK_TIME: Timestamp = 4 * YEAR;

/// Rounds `t` down to the start of its week (weeks start at the unix epoch).
pub fn week_floor(t: Timestamp) -> Timestamp {
    t / WEEK * WEEK
}

/// Rounds `t` up to a week boundary; week-aligned values are returned unchanged.
pub fn week_ceil(t: Timestamp) -> Timestamp {
    week_floor(t.saturating_add(WEEK - 1))
}

/// First week boundary strictly after `t`.
pub fn next_week(t: Timestamp) -> Timestamp {
    week_floor(t).saturating_add(WEEK)
}

/// The current time as observed by a state transition.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChainTime {
    pub ts: Timestamp,
    pub block: BlockNumber,
}

impl ChainTime {
    pub fn new(ts: Timestamp, block: BlockNumber) -> Self {
        Self { ts, block }
    }

    /// Clock `secs` later, with the block height advanced by `blocks`.
    pub fn advance(self, secs: Timestamp, blocks: BlockNumber) -> Self {
        Self {
            ts: self.ts + secs,
            block: self.block + blocks,
        }
    }

    /// Fails unless `now` is at or after `self` in both coordinates.
    pub fn ensure_not_before(self, now: ChainTime) -> Result<()> {
        if now.ts < self.ts || now.block < self.block {
            return Err(VeError::ClockRegression { last: self, now });
        }
        Ok(())
    }
}
