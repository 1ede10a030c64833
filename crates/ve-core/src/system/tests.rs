use super::*;
use crate::time::WEEK;
use crate::types::{GaugeId, GaugeTypeId, VotePower};

const TOKEN: u128 = 1_000_000_000_000_000_000;
const W0: u64 = 2_800 * WEEK;

fn acct(n: u64) -> AccountId {
    AccountId::from_low_u64_be(n)
}

fn admin() -> AccountId {
    acct(100)
}

fn at(ts: u64) -> ChainTime {
    ChainTime::new(ts, 1_000 + (ts - W0) / 12)
}

fn system() -> VeSystem {
    VeSystem::new(admin(), acct(101), VeConfig::default(), at(W0)).unwrap()
}

fn lock(account: AccountId, amount: u128, weeks: u64) -> Action {
    Action::CreateLock {
        account,
        amount,
        unlock_time: W0 + weeks * WEEK,
    }
}

#[test]
fn deny_all_gate_blocks_without_mutation() {
    let mut sys = system();
    let before = sys.state_hash_v1().unwrap();
    let err = sys
        .apply(&DenyAllGate, at(W0 + 1), lock(acct(1), TOKEN, 4))
        .unwrap_err();
    assert!(matches!(err, VeError::Unauthorized(_)));
    assert_eq!(sys.state_hash_v1().unwrap(), before);
    assert_eq!(sys.metrics().actions_denied.get(), 1);
    assert_eq!(sys.metrics().actions_applied.get(), 0);
}

#[test]
fn allowlist_gate_restricts_lockers_only() {
    let mut sys = system();
    let gate = LockerAllowlistGate::new([acct(1)]);
    sys.apply(&gate, at(W0 + 1), lock(acct(1), TOKEN, 4)).unwrap();
    assert!(matches!(
        sys.apply(&gate, at(W0 + 2), lock(acct(2), TOKEN, 4)),
        Err(VeError::Unauthorized(_))
    ));
    // Funding someone else's lock is not a lock change by the funder.
    sys.apply(
        &gate,
        at(W0 + 3),
        Action::DepositFor {
            account: acct(1),
            amount: TOKEN,
        },
    )
    .unwrap();
    assert_eq!(sys.escrow().supply(), 2 * TOKEN);
    assert_eq!(sys.deposited(), 2 * TOKEN);
}

#[test]
fn failed_actions_leave_state_hash_unchanged() {
    let mut sys = system();
    sys.apply(&AllowAllGate, at(W0 + 1), lock(acct(1), TOKEN, 4))
        .unwrap();
    let before = sys.state_hash_v1().unwrap();

    let failing = [
        lock(acct(1), TOKEN, 8),
        Action::Withdraw { account: acct(1) },
        Action::IncreaseUnlockTime {
            account: acct(1),
            unlock_time: W0 + WEEK,
        },
        Action::VoteForGaugeWeights {
            voter: acct(1),
            gauge: GaugeId::from_low_u64_be(5),
            power: VotePower::MAX,
        },
        Action::AddGaugeType {
            caller: acct(1),
            name: "x".into(),
            weight: 1,
        },
        Action::ReceiveRevenue { amount: 0 },
        Action::CheckpointToken { caller: acct(1) },
    ];
    for action in failing {
        let kind = action.kind();
        assert!(sys.apply(&AllowAllGate, at(W0 + 2), action).is_err(), "{kind}");
        assert_eq!(sys.state_hash_v1().unwrap(), before, "{kind}");
    }
    assert_eq!(sys.metrics().actions_rejected.get(), 7);
}

#[test]
fn outcomes_update_metrics_and_invariants_hold() {
    let mut sys = system();
    let g = AllowAllGate;
    let gauge = GaugeId::from_low_u64_be(1);
    sys.apply(
        &g,
        at(W0 + 1),
        Action::AddGaugeType {
            caller: admin(),
            name: "liquidity".into(),
            weight: 1,
        },
    )
    .unwrap();
    sys.apply(
        &g,
        at(W0 + 2),
        Action::AddGauge {
            caller: admin(),
            gauge,
            type_id: GaugeTypeId(0),
            weight: 0,
        },
    )
    .unwrap();
    sys.apply(&g, at(W0 + 3), lock(acct(1), 10 * TOKEN, 10)).unwrap();
    sys.apply(
        &g,
        at(W0 + 4),
        Action::VoteForGaugeWeights {
            voter: acct(1),
            gauge,
            power: VotePower::new(7_500).unwrap(),
        },
    )
    .unwrap();
    sys.apply(&g, at(W0 + 5), Action::ReceiveRevenue { amount: TOKEN })
        .unwrap();
    sys.apply(&g, at(W0 + 3 * WEEK), Action::CheckpointToken { caller: admin() })
        .unwrap();
    let out = sys
        .apply(&g, at(W0 + 3 * WEEK), Action::Claim { account: acct(1) })
        .unwrap();
    let c = match out {
        Outcome::Claimed(c) => c,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert!(c.amount > 0);

    let m = sys.metrics();
    assert_eq!(m.locks_created.get(), 1);
    assert_eq!(m.votes_cast.get(), 1);
    assert_eq!(m.claims_paid.get(), 1);
    assert_eq!(m.active_locks.get(), 1);
    assert_eq!(m.actions_applied.get(), 7);
    assert_eq!(sys.check_invariants_v1(), Ok(()));
}

#[test]
fn state_round_trips_through_json() {
    let mut sys = system();
    sys.apply(&AllowAllGate, at(W0 + 1), lock(acct(1), TOKEN, 4))
        .unwrap();
    let json = sys.to_json().unwrap();
    let back = VeSystem::from_json(&json).unwrap();
    assert_eq!(back.state_hash_v1().unwrap(), sys.state_hash_v1().unwrap());
    assert_eq!(back.escrow(), sys.escrow());
    assert!(VeSystem::from_json("{").is_err());
}

#[test]
fn state_hash_commits_to_the_serialized_state() {
    let mut sys = system();
    let empty = sys.state_hash_v1().unwrap();
    let json = sys.to_json().unwrap();
    assert_eq!(empty, crate::hash::hash_state_v1(json.as_bytes()));

    sys.apply(&AllowAllGate, at(W0 + 1), lock(acct(1), TOKEN, 4))
        .unwrap();
    let locked = sys.state_hash_v1().unwrap();
    assert_ne!(locked, empty);
    // Metrics are not part of the commitment.
    sys.metrics().actions_applied.inc();
    assert_eq!(sys.state_hash_v1().unwrap(), locked);
}

#[test]
fn admin_handovers_run_through_apply() {
    let mut sys = system();
    let next = acct(9);
    let now = at(W0 + 1);

    // Only the sitting admin may start or finish a handover.
    assert!(matches!(
        sys.apply(
            &AllowAllGate,
            now,
            Action::CommitGaugeAdmin {
                caller: next,
                new_admin: next,
            }
        ),
        Err(VeError::Unauthorized(_))
    ));
    assert!(sys
        .apply(&AllowAllGate, now, Action::ApplyFeeAdmin { caller: admin() })
        .is_err());

    for action in [
        Action::CommitGaugeAdmin {
            caller: admin(),
            new_admin: next,
        },
        Action::ApplyGaugeAdmin { caller: admin() },
        Action::CommitFeeAdmin {
            caller: admin(),
            new_admin: next,
        },
        Action::ApplyFeeAdmin { caller: admin() },
    ] {
        let kind = action.kind();
        assert_eq!(sys.apply(&AllowAllGate, now, action), Ok(Outcome::Unit), "{kind}");
    }
    assert_eq!(sys.gauges().admin(), next);
    assert_eq!(sys.gauges().future_admin(), None);
    assert_eq!(sys.fees().admin(), next);

    // The old admin is locked out and the new one is in.
    assert!(sys
        .apply(
            &AllowAllGate,
            now,
            Action::ToggleAllowCheckpointToken { caller: admin() }
        )
        .is_err());
    assert_eq!(
        sys.apply(
            &AllowAllGate,
            now,
            Action::AddGaugeType {
                caller: next,
                name: "stable".into(),
                weight: 1,
            }
        ),
        Ok(Outcome::GaugeType(GaugeTypeId(0)))
    );
    assert_eq!(sys.check_invariants_v1(), Ok(()));
}

#[test]
fn invariant_violation_converts_to_error() {
    let v = InvariantViolation::new(InvariantId::LockShape, "bad lock");
    let e: VeError = v.into();
    assert_eq!(
        e,
        VeError::InvariantViolated("LockShape: bad lock".into())
    );
}
