use serde::{Deserialize, Serialize};

use crate::escrow::DepositKind;
use crate::hash::{sha256_domain, TRACE_HASH_DOMAIN_V1};
use crate::time::ChainTime;
use crate::{Hash32, Result, VeError};

use super::{
    Action, AllowAllGate, InvariantCounterexample, InvariantId, InvariantViolation, Outcome,
    VeSystem,
};

/// An action together with the chain time it is applied at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedAction {
    pub now: ChainTime,
    pub action: Action,
}

impl TimedAction {
    pub fn new(now: ChainTime, action: Action) -> Self {
        Self { now, action }
    }
}

/// Commitment to an action trace, for comparing counterexamples across runs.
pub fn trace_hash_v1(actions: &[TimedAction]) -> Result<Hash32> {
    let bytes = serde_json::to_vec(actions)
        .map_err(|e| VeError::InvalidInput(format!("trace serialization failed: {e}")))?;
    Ok(sha256_domain(TRACE_HASH_DOMAIN_V1, &bytes))
}

/// Run an action trace from `initial` and return the first invariant counterexample (if any).
///
/// Invariants checked:
/// - "no mutation on error" (state hash must not change if `apply` returns `Err`)
/// - `VeSystem::check_invariants_v1` after every successful action
/// - receipt consistency for lock, withdraw and claim outcomes
pub fn first_invariant_counterexample_v1(
    initial: &VeSystem,
    actions: &[TimedAction],
) -> Result<Option<InvariantCounterexample>> {
    let mut sys = initial.clone();
    let gate = AllowAllGate;

    for (i, step) in actions.iter().enumerate() {
        let before_hash = sys.state_hash_v1()?;
        let before_supply = sys.escrow().supply();
        let r = sys.apply(&gate, step.now, step.action.clone());

        let violation = match r {
            Err(e) => {
                if sys.state_hash_v1()? == before_hash {
                    continue;
                }
                InvariantViolation::new(
                    InvariantId::NoMutationOnError,
                    format!("action returned Err but state hash changed: {e}"),
                )
            }
            Ok(outcome) => {
                match check_transition_invariants(&step.action, &outcome, before_supply) {
                    Some(v) => v,
                    None => match sys.check_invariants_v1() {
                        Ok(()) => continue,
                        Err(v) => v,
                    },
                }
            }
        };
        return Ok(Some(InvariantCounterexample {
            violation,
            at_step: i,
            state_hash: sys.state_hash_v1()?,
            actions: actions[..=i].to_vec(),
        }));
    }

    Ok(None)
}

fn check_transition_invariants(
    action: &Action,
    outcome: &Outcome,
    supply_before: u128,
) -> Option<InvariantViolation> {
    let mismatch = |details: String| Some(InvariantViolation::new(InvariantId::ReceiptConsistent, details));
    match (action, outcome) {
        (_, Outcome::Lock(r)) => {
            let added = if r.kind == DepositKind::IncreaseUnlockTime {
                0
            } else {
                r.value
            };
            if r.supply_before != supply_before || r.supply_after != supply_before + added {
                return mismatch(format!(
                    "lock receipt supply {} -> {} with value {}, expected from {supply_before}",
                    r.supply_before, r.supply_after, r.value
                ));
            }
        }
        (Action::Withdraw { account }, Outcome::Withdraw(r)) => {
            if r.account != *account || r.supply_after + r.value != supply_before {
                return mismatch(format!(
                    "withdraw receipt value {} supply_after {} from {supply_before}",
                    r.value, r.supply_after
                ));
            }
        }
        (Action::Claim { account }, Outcome::Claimed(c)) if c.account != *account => {
            return mismatch(format!("claim for {account} reported {}", c.account));
        }
        _ => {}
    }
    None
}

/// Minimize an invariant counterexample by removing actions while preserving the same invariant id.
///
/// This is a deterministic delta-debugging (ddmin) pass over the action list. Removing
/// actions never reorders time: the remaining actions keep their original `now`.
pub fn minimize_counterexample_v1(
    initial: &VeSystem,
    ce: &InvariantCounterexample,
) -> Result<InvariantCounterexample> {
    let want = ce.violation.id;

    let Some(first) = first_invariant_counterexample_v1(initial, &ce.actions)? else {
        return Err(VeError::InvalidInput(
            "minimize_counterexample_v1: provided trace does not reproduce".into(),
        ));
    };
    if first.violation.id != want {
        return Err(VeError::InvalidInput(
            "minimize_counterexample_v1: provided trace reproduces a different invariant".into(),
        ));
    }
    let mut cur = first.actions;

    let mut n = 2usize;
    while cur.len() >= 2 {
        let len = cur.len();
        let chunk = len.div_ceil(n);
        let mut reduced = false;

        for start in (0..len).step_by(chunk) {
            let end = (start + chunk).min(len);
            if start == 0 && end == len {
                continue;
            }
            let mut cand = Vec::with_capacity(len - (end - start));
            cand.extend_from_slice(&cur[..start]);
            cand.extend_from_slice(&cur[end..]);

            let Some(r) = first_invariant_counterexample_v1(initial, &cand)? else {
                continue;
            };
            if r.violation.id != want {
                continue;
            }

            cur = r.actions;
            n = n.saturating_sub(1).max(2);
            reduced = true;
            break;
        }

        if reduced {
            continue;
        }
        if n >= len {
            break;
        }
        n = (n * 2).min(len);
    }

    first_invariant_counterexample_v1(initial, &cur)?.ok_or_else(|| {
        VeError::InvalidInput(
            "minimize_counterexample_v1: lost counterexample during minimization".into(),
        )
    })
}
