use serde::{Deserialize, Serialize};

use crate::escrow::{LockReceipt, WithdrawReceipt};
use crate::fees::{Claimed, TokenCheckpoint};
use crate::gauge::VoteCast;
use crate::time::Timestamp;
use crate::types::{AccountId, GaugeId, GaugeTypeId, VotePower};
use crate::CheckpointProgress;

/// Every state transition of a [`super::VeSystem`].
///
/// This is the action space an [`super::ActionGate`] authorizes and the invariant rail replays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    CreateLock {
        account: AccountId,
        amount: u128,
        unlock_time: Timestamp,
    },
    /// Top up someone else's live lock.
    DepositFor { account: AccountId, amount: u128 },
    IncreaseAmount { account: AccountId, amount: u128 },
    IncreaseUnlockTime {
        account: AccountId,
        unlock_time: Timestamp,
    },
    Withdraw { account: AccountId },
    CheckpointEscrow,

    AddGaugeType {
        caller: AccountId,
        name: String,
        weight: u128,
    },
    AddGauge {
        caller: AccountId,
        gauge: GaugeId,
        type_id: GaugeTypeId,
        weight: u128,
    },
    ChangeTypeWeight {
        caller: AccountId,
        type_id: GaugeTypeId,
        weight: u128,
    },
    ChangeGaugeWeight {
        caller: AccountId,
        gauge: GaugeId,
        weight: u128,
    },
    VoteForGaugeWeights {
        voter: AccountId,
        gauge: GaugeId,
        power: VotePower,
    },
    CheckpointGauge { gauge: GaugeId },
    CheckpointGaugeTypes,
    /// First step of a gauge admin handover; `ApplyGaugeAdmin` completes it.
    CommitGaugeAdmin {
        caller: AccountId,
        new_admin: AccountId,
    },
    ApplyGaugeAdmin { caller: AccountId },

    /// Revenue transferred into fee custody (boundary IO).
    ReceiveRevenue { amount: u128 },
    CheckpointToken { caller: AccountId },
    CheckpointTotalSupply,
    Claim { account: AccountId },
    ClaimMany { accounts: Vec<AccountId> },
    ToggleAllowCheckpointToken { caller: AccountId },
    KillFees { caller: AccountId },
    CommitFeeAdmin {
        caller: AccountId,
        new_admin: AccountId,
    },
    ApplyFeeAdmin { caller: AccountId },
}

impl Action {
    /// Stable short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateLock { .. } => "create_lock",
            Action::DepositFor { .. } => "deposit_for",
            Action::IncreaseAmount { .. } => "increase_amount",
            Action::IncreaseUnlockTime { .. } => "increase_unlock_time",
            Action::Withdraw { .. } => "withdraw",
            Action::CheckpointEscrow => "checkpoint_escrow",
            Action::AddGaugeType { .. } => "add_gauge_type",
            Action::AddGauge { .. } => "add_gauge",
            Action::ChangeTypeWeight { .. } => "change_type_weight",
            Action::ChangeGaugeWeight { .. } => "change_gauge_weight",
            Action::VoteForGaugeWeights { .. } => "vote_for_gauge_weights",
            Action::CheckpointGauge { .. } => "checkpoint_gauge",
            Action::CheckpointGaugeTypes => "checkpoint_gauge_types",
            Action::CommitGaugeAdmin { .. } => "commit_gauge_admin",
            Action::ApplyGaugeAdmin { .. } => "apply_gauge_admin",
            Action::ReceiveRevenue { .. } => "receive_revenue",
            Action::CheckpointToken { .. } => "checkpoint_token",
            Action::CheckpointTotalSupply => "checkpoint_total_supply",
            Action::Claim { .. } => "claim",
            Action::ClaimMany { .. } => "claim_many",
            Action::ToggleAllowCheckpointToken { .. } => "toggle_allow_checkpoint_token",
            Action::KillFees { .. } => "kill_fees",
            Action::CommitFeeAdmin { .. } => "commit_fee_admin",
            Action::ApplyFeeAdmin { .. } => "apply_fee_admin",
        }
    }

    /// Account whose lock the action creates or modifies, if any.
    pub fn locker(&self) -> Option<AccountId> {
        match self {
            Action::CreateLock { account, .. }
            | Action::IncreaseAmount { account, .. }
            | Action::IncreaseUnlockTime { account, .. } => Some(*account),
            _ => None,
        }
    }
}

/// Observable result of a state transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Unit,
    Lock(LockReceipt),
    Withdraw(WithdrawReceipt),
    Checkpoint(CheckpointProgress),
    GaugeType(GaugeTypeId),
    Vote(VoteCast),
    Revenue(Option<TokenCheckpoint>),
    TokenCheckpoint(TokenCheckpoint),
    Claimed(Claimed),
    ClaimedMany(u128),
    Toggled(bool),
    Killed(u128),
}
