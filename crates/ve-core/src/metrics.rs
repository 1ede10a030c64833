//! Operation counters for the vote-escrow core.
//!
//! Updated by [`crate::system::VeSystem::apply`]; hosts export them with
//! [`VeMetrics::to_json`].

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Event count. Saturates at `u64::MAX` instead of wrapping.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1u64);
    }

    /// Adds `n`; amounts wider than `u64` count as `u64::MAX`.
    pub fn add(&self, n: impl TryInto<u64>) {
        let n = n.try_into().unwrap_or(u64::MAX);
        // The closure never returns `None`, so the update always lands.
        let _ = self
            .0
            .fetch_update(Relaxed, Relaxed, |v| Some(v.saturating_add(n)));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Relaxed)
    }
}

/// Current size of something, overwritten after every applied action.
#[derive(Debug, Default)]
pub struct Level(AtomicU64);

impl Level {
    pub fn set(&self, v: u64) {
        self.0.store(v, Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct VeMetrics {
    pub actions_applied: Counter,
    pub actions_rejected: Counter,
    pub actions_denied: Counter,

    pub locks_created: Counter,
    pub lock_updates: Counter,
    pub withdrawals: Counter,
    pub votes_cast: Counter,
    pub weeks_replayed: Counter,
    pub claims_paid: Counter,

    /// Fee amount paid out, saturating at `u64::MAX` base units.
    pub fee_amount_claimed: Counter,

    /// Accounts holding a non-empty lock.
    pub active_locks: Level,
}

impl VeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export metrics as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "counters": {
                "actions_applied": self.actions_applied.get(),
                "actions_rejected": self.actions_rejected.get(),
                "actions_denied": self.actions_denied.get(),
                "locks_created": self.locks_created.get(),
                "lock_updates": self.lock_updates.get(),
                "withdrawals": self.withdrawals.get(),
                "votes_cast": self.votes_cast.get(),
                "weeks_replayed": self.weeks_replayed.get(),
                "claims_paid": self.claims_paid.get(),
                "fee_amount_claimed": self.fee_amount_claimed.get(),
            },
            "levels": {
                "active_locks": self.active_locks.get(),
            },
        })
    }
}
