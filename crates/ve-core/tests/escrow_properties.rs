//! Property tests for the escrow ledger driven through `VeSystem::apply`.
//!
//! Random sequences of lock, top-up, extend and withdraw actions over a handful of accounts,
//! with time moving forward between steps.

use proptest::prelude::*;
use ve_core::system::AllowAllGate;
use ve_core::time::{DAY, WEEK};
use ve_core::{AccountId, Action, ChainTime, VeConfig, VeSystem};

const TOKEN: u128 = 1_000_000_000_000_000_000;
const W0: u64 = 2_800 * WEEK;
const ACCOUNTS: u64 = 4;

#[derive(Clone, Debug)]
enum Op {
    Create { who: u64, amount: u128, weeks: u64 },
    Increase { who: u64, amount: u128 },
    Extend { who: u64, weeks: u64 },
    Withdraw { who: u64 },
    Checkpoint,
}

fn acct(n: u64) -> AccountId {
    AccountId::from_low_u64_be(n + 1)
}

fn at(ts: u64) -> ChainTime {
    ChainTime::new(ts, 1_000 + (ts - W0) / 12)
}

fn system() -> VeSystem {
    VeSystem::new(
        AccountId::from_low_u64_be(100),
        AccountId::from_low_u64_be(101),
        VeConfig::default(),
        at(W0),
    )
    .unwrap()
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..ACCOUNTS, 1u128..1_000u128, 1u64..200u64)
            .prop_map(|(who, n, weeks)| Op::Create { who, amount: n * TOKEN / 10, weeks }),
        2 => (0..ACCOUNTS, 1u128..1_000u128)
            .prop_map(|(who, n)| Op::Increase { who, amount: n * TOKEN / 10 }),
        2 => (0..ACCOUNTS, 1u64..200u64).prop_map(|(who, weeks)| Op::Extend { who, weeks }),
        2 => (0..ACCOUNTS).prop_map(|who| Op::Withdraw { who }),
        1 => Just(Op::Checkpoint),
    ]
}

fn to_action(op: &Op, now: u64) -> Action {
    match *op {
        Op::Create { who, amount, weeks } => Action::CreateLock {
            account: acct(who),
            amount,
            unlock_time: now + weeks * WEEK,
        },
        Op::Increase { who, amount } => Action::IncreaseAmount {
            account: acct(who),
            amount,
        },
        Op::Extend { who, weeks } => Action::IncreaseUnlockTime {
            account: acct(who),
            unlock_time: now + weeks * WEEK,
        },
        Op::Withdraw { who } => Action::Withdraw { account: acct(who) },
        Op::Checkpoint => Action::CheckpointEscrow,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn locked_supply_is_conserved(
        steps in proptest::collection::vec((op_strategy(), 1u64..(3 * WEEK)), 1..40),
    ) {
        let mut sys = system();
        let mut now = W0;
        for (op, dt) in &steps {
            now += dt;
            let before = sys.state_hash_v1().unwrap();
            if sys.apply(&AllowAllGate, at(now), to_action(op, now)).is_err() {
                prop_assert_eq!(sys.state_hash_v1().unwrap(), before);
            }
            prop_assert_eq!(sys.expected_locked().unwrap(), sys.escrow().supply());
            let sum: u128 = sys.escrow().locks().map(|(_, l)| l.amount).sum();
            prop_assert_eq!(sum, sys.escrow().supply());
            prop_assert_eq!(sys.check_invariants_v1(), Ok(()));
        }
    }

    #[test]
    fn balances_never_increase_without_actions(
        steps in proptest::collection::vec((op_strategy(), 1u64..(2 * WEEK)), 1..30),
    ) {
        let mut sys = system();
        let mut now = W0;
        for (op, dt) in &steps {
            now += dt;
            let _ = sys.apply(&AllowAllGate, at(now), to_action(op, now));
        }
        let escrow = sys.escrow();
        for who in 0..ACCOUNTS {
            let mut prev = escrow.balance_of(acct(who), now);
            for k in 1..=60u64 {
                let cur = escrow.balance_of(acct(who), now + k * 5 * DAY);
                prop_assert!(cur <= prev, "account {} rose from {} to {}", who, prev, cur);
                prev = cur;
            }
            let end = escrow.locked_end(acct(who));
            if end > 0 {
                prop_assert_eq!(escrow.balance_of(acct(who), end.max(now)), 0);
            }
        }
        let mut prev = escrow.total_supply(now);
        for k in 1..=60u64 {
            let cur = escrow.total_supply(now + k * 5 * DAY);
            prop_assert!(cur <= prev);
            prev = cur;
        }
    }

    #[test]
    fn past_balances_are_not_rewritten(
        steps in proptest::collection::vec((op_strategy(), 1u64..(2 * WEEK)), 1..30),
    ) {
        let mut sys = system();
        let mut now = W0;
        let mut seen: Vec<(u64, [u128; ACCOUNTS as usize], u128)> = Vec::new();
        for (op, dt) in &steps {
            now += dt;
            if sys.apply(&AllowAllGate, at(now), to_action(op, now)).is_ok() {
                let escrow = sys.escrow();
                let balances = [0, 1, 2, 3].map(|who| escrow.balance_of(acct(who), now));
                seen.push((now, balances, escrow.total_supply(now)));
            }
        }
        let escrow = sys.escrow();
        for (t, balances, supply) in seen {
            for who in 0..ACCOUNTS {
                prop_assert_eq!(escrow.balance_of(acct(who), t), balances[who as usize]);
            }
            prop_assert_eq!(escrow.total_supply(t), supply);
        }
    }
}

#[test]
fn lock_lifecycle_round_trip() {
    let mut sys = system();
    let alice = acct(0);
    let g = AllowAllGate;
    sys.apply(
        &g,
        at(W0 + DAY),
        Action::CreateLock {
            account: alice,
            amount: 10 * TOKEN,
            unlock_time: W0 + 10 * WEEK,
        },
    )
    .unwrap();
    sys.apply(
        &g,
        at(W0 + 2 * DAY),
        Action::IncreaseUnlockTime {
            account: alice,
            unlock_time: W0 + 20 * WEEK,
        },
    )
    .unwrap();
    assert!(sys
        .apply(&g, at(W0 + 19 * WEEK), Action::Withdraw { account: alice })
        .is_err());
    sys.apply(&g, at(W0 + 20 * WEEK), Action::Withdraw { account: alice })
        .unwrap();

    assert_eq!(sys.escrow().supply(), 0);
    assert_eq!(sys.deposited(), 10 * TOKEN);
    assert_eq!(sys.withdrawn(), 10 * TOKEN);
    assert_eq!(sys.escrow().balance_of(alice, W0 + 20 * WEEK), 0);
    assert!(sys.escrow().balance_of(alice, W0 + 3 * DAY) > 0);
    assert_eq!(sys.check_invariants_v1(), Ok(()));
}
