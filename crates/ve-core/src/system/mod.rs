//! Single-writer facade over the escrow, the gauge controller and the fee distributor.
//!
//! Every transition goes through [`VeSystem::apply`]: gate check, then exactly one component
//! operation. A returned error leaves [`VeSystem::state_hash_v1`] unchanged.

mod actions;
mod gate;
pub mod invariant_rail;
mod invariants;

pub use actions::{Action, Outcome};
pub use gate::{ActionGate, AllowAllGate, DenyAllGate, LockerAllowlistGate};
pub use invariants::{InvariantCounterexample, InvariantId, InvariantViolation};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::VeConfig;
use crate::escrow::{DepositKind, VotingEscrow};
use crate::fees::FeeDistributor;
use crate::gauge::GaugeController;
use crate::hash::hash_state_v1;
use crate::math::{add_u128, sub_u128};
use crate::metrics::VeMetrics;
use crate::time::ChainTime;
use crate::types::AccountId;
use crate::{Hash32, Result, VeError};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VeSystem {
    config: VeConfig,
    escrow: VotingEscrow,
    gauges: GaugeController,
    fees: FeeDistributor,
    /// Tokens ever moved into locks.
    deposited: u128,
    /// Tokens ever released by withdrawals.
    withdrawn: u128,
    #[serde(skip)]
    metrics: Arc<VeMetrics>,
}

impl VeSystem {
    /// New system; `admin` owns the gauge controller and the fee distributor, whose first
    /// fee week is the week of `genesis`.
    pub fn new(
        admin: AccountId,
        emergency_return: AccountId,
        config: VeConfig,
        genesis: ChainTime,
    ) -> Result<Self> {
        config.validate()?;
        let escrow = VotingEscrow::new(config.escrow.clone(), genesis)?;
        let gauges = GaugeController::new(admin, config.gauges.clone(), genesis)?;
        let fees = FeeDistributor::new(
            admin,
            emergency_return,
            genesis.ts,
            config.fees.clone(),
            genesis,
        )?;
        Ok(Self {
            config,
            escrow,
            gauges,
            fees,
            deposited: 0,
            withdrawn: 0,
            metrics: Arc::new(VeMetrics::new()),
        })
    }

    /// Share `metrics` with the host instead of the system's private set.
    pub fn with_metrics(mut self, metrics: Arc<VeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &VeConfig {
        &self.config
    }

    pub fn escrow(&self) -> &VotingEscrow {
        &self.escrow
    }

    pub fn gauges(&self) -> &GaugeController {
        &self.gauges
    }

    pub fn fees(&self) -> &FeeDistributor {
        &self.fees
    }

    pub fn metrics(&self) -> &VeMetrics {
        &self.metrics
    }

    pub fn deposited(&self) -> u128 {
        self.deposited
    }

    pub fn withdrawn(&self) -> u128 {
        self.withdrawn
    }

    /// Applies one action at `now` after `gate` approves it.
    #[instrument(level = "debug", skip(self, gate, action), fields(kind = action.kind()))]
    pub fn apply<G: ActionGate + ?Sized>(
        &mut self,
        gate: &G,
        now: ChainTime,
        action: Action,
    ) -> Result<Outcome> {
        if let Err(e) = gate.check(self, &action) {
            self.metrics.actions_denied.inc();
            debug!(error = %e, "action denied by gate");
            return Err(e);
        }
        match self.dispatch(now, action) {
            Ok(outcome) => {
                self.metrics.actions_applied.inc();
                self.record(&outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.actions_rejected.inc();
                debug!(error = %e, "action rejected");
                Err(e)
            }
        }
    }

    /// `sha256("VE_CORE_STATE_V1" || json(state))`. Metrics are not state.
    pub fn state_hash_v1(&self) -> Result<Hash32> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| VeError::InvalidInput(format!("state serialization failed: {e}")))?;
        Ok(hash_state_v1(&bytes))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| VeError::InvalidInput(format!("state serialization failed: {e}")))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let sys: VeSystem = serde_json::from_str(s)
            .map_err(|e| VeError::InvalidInput(format!("state deserialization failed: {e}")))?;
        sys.config.validate()?;
        Ok(sys)
    }

    fn dispatch(&mut self, now: ChainTime, action: Action) -> Result<Outcome> {
        match action {
            Action::CreateLock {
                account,
                amount,
                unlock_time,
            } => {
                let deposited = add_u128(self.deposited, amount)?;
                let r = self.escrow.create_lock(account, amount, unlock_time, now)?;
                self.deposited = deposited;
                Ok(Outcome::Lock(r))
            }
            Action::DepositFor { account, amount } => {
                let deposited = add_u128(self.deposited, amount)?;
                let r = self.escrow.deposit_for(account, amount, now)?;
                self.deposited = deposited;
                Ok(Outcome::Lock(r))
            }
            Action::IncreaseAmount { account, amount } => {
                let deposited = add_u128(self.deposited, amount)?;
                let r = self.escrow.increase_amount(account, amount, now)?;
                self.deposited = deposited;
                Ok(Outcome::Lock(r))
            }
            Action::IncreaseUnlockTime {
                account,
                unlock_time,
            } => self
                .escrow
                .increase_unlock_time(account, unlock_time, now)
                .map(Outcome::Lock),
            Action::Withdraw { account } => {
                let amount = self.escrow.locked(account).amount;
                let withdrawn = add_u128(self.withdrawn, amount)?;
                let r = self.escrow.withdraw(account, now)?;
                self.withdrawn = withdrawn;
                Ok(Outcome::Withdraw(r))
            }
            Action::CheckpointEscrow => self.escrow.checkpoint(now).map(Outcome::Checkpoint),

            Action::AddGaugeType {
                caller,
                name,
                weight,
            } => self
                .gauges
                .add_gauge_type(caller, name, weight, now)
                .map(Outcome::GaugeType),
            Action::AddGauge {
                caller,
                gauge,
                type_id,
                weight,
            } => self
                .gauges
                .add_gauge(caller, gauge, type_id, weight, now)
                .map(|()| Outcome::Unit),
            Action::ChangeTypeWeight {
                caller,
                type_id,
                weight,
            } => self
                .gauges
                .change_type_weight(caller, type_id, weight, now)
                .map(|()| Outcome::Unit),
            Action::ChangeGaugeWeight {
                caller,
                gauge,
                weight,
            } => self
                .gauges
                .change_gauge_weight(caller, gauge, weight, now)
                .map(|()| Outcome::Unit),
            Action::VoteForGaugeWeights {
                voter,
                gauge,
                power,
            } => self
                .gauges
                .vote_for_gauge_weights(&self.escrow, voter, gauge, power, now)
                .map(Outcome::Vote),
            Action::CheckpointGauge { gauge } => self
                .gauges
                .checkpoint_gauge(gauge, now)
                .map(Outcome::Checkpoint),
            Action::CheckpointGaugeTypes => self.gauges.checkpoint(now).map(Outcome::Checkpoint),
            Action::CommitGaugeAdmin { caller, new_admin } => self
                .gauges
                .commit_transfer_ownership(caller, new_admin)
                .map(|()| Outcome::Unit),
            Action::ApplyGaugeAdmin { caller } => self
                .gauges
                .apply_transfer_ownership(caller)
                .map(|()| Outcome::Unit),

            Action::ReceiveRevenue { amount } => {
                self.fees.receive_revenue(amount, now).map(Outcome::Revenue)
            }
            Action::CheckpointToken { caller } => self
                .fees
                .checkpoint_token(caller, now)
                .map(Outcome::TokenCheckpoint),
            Action::CheckpointTotalSupply => self
                .fees
                .checkpoint_total_supply(&self.escrow, now)
                .map(Outcome::Checkpoint),
            Action::Claim { account } => self
                .fees
                .claim(&self.escrow, account, now)
                .map(Outcome::Claimed),
            Action::ClaimMany { accounts } => self
                .fees
                .claim_many(&self.escrow, &accounts, now)
                .map(Outcome::ClaimedMany),
            Action::ToggleAllowCheckpointToken { caller } => self
                .fees
                .toggle_allow_checkpoint_token(caller)
                .map(Outcome::Toggled),
            Action::KillFees { caller } => self.fees.kill(caller, now).map(Outcome::Killed),
            Action::CommitFeeAdmin { caller, new_admin } => self
                .fees
                .commit_admin(caller, new_admin)
                .map(|()| Outcome::Unit),
            Action::ApplyFeeAdmin { caller } => self
                .fees
                .apply_admin(caller)
                .map(|()| Outcome::Unit),
        }
    }

    fn record(&self, outcome: &Outcome) {
        let m = &self.metrics;
        match outcome {
            Outcome::Lock(r) if r.kind == DepositKind::CreateLock => m.locks_created.inc(),
            Outcome::Lock(_) => m.lock_updates.inc(),
            Outcome::Withdraw(_) => m.withdrawals.inc(),
            Outcome::Vote(_) => m.votes_cast.inc(),
            Outcome::Checkpoint(p) => m.weeks_replayed.add(p.weeks_processed),
            Outcome::Claimed(c) if c.amount > 0 => {
                m.claims_paid.inc();
                m.fee_amount_claimed.add(c.amount);
            }
            Outcome::ClaimedMany(total) if *total > 0 => {
                m.claims_paid.inc();
                m.fee_amount_claimed.add(*total);
            }
            _ => {}
        }
        m.active_locks
            .set(self.escrow.locks().filter(|(_, l)| !l.is_empty()).count() as u64);
    }

    /// Tokens the escrow must hold: deposits minus withdrawals.
    pub fn expected_locked(&self) -> Result<u128> {
        sub_u128(self.deposited, self.withdrawn)
    }
}

#[cfg(test)]
mod tests;
