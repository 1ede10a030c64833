//! Seeded random walks over the whole action surface, checked by the invariant rail.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ve_core::system::invariant_rail::{
    first_invariant_counterexample_v1, minimize_counterexample_v1, TimedAction,
};
use ve_core::system::AllowAllGate;
use ve_core::time::{DAY, WEEK};
use ve_core::{
    AccountId, Action, ChainTime, GaugeId, GaugeTypeId, VeConfig, VeSystem, VotePower,
};

const TOKEN: u128 = 1_000_000_000_000_000_000;
const W0: u64 = 2_800 * WEEK;

fn acct(n: u64) -> AccountId {
    AccountId::from_low_u64_be(n)
}

fn admin() -> AccountId {
    acct(100)
}

fn gauge(n: u64) -> GaugeId {
    GaugeId::from_low_u64_be(n)
}

fn system() -> VeSystem {
    VeSystem::new(admin(), acct(101), VeConfig::default(), ChainTime::new(W0, 1_000)).unwrap()
}

/// Admin setup every walk starts from: two gauge types with one gauge each.
fn preamble() -> Vec<TimedAction> {
    let now = ChainTime::new(W0 + 1, 1_000);
    vec![
        TimedAction::new(
            now,
            Action::AddGaugeType {
                caller: admin(),
                name: "stable".into(),
                weight: 1,
            },
        ),
        TimedAction::new(
            now,
            Action::AddGaugeType {
                caller: admin(),
                name: "volatile".into(),
                weight: 3,
            },
        ),
        TimedAction::new(
            now,
            Action::AddGauge {
                caller: admin(),
                gauge: gauge(1),
                type_id: GaugeTypeId(0),
                weight: 0,
            },
        ),
        TimedAction::new(
            now,
            Action::AddGauge {
                caller: admin(),
                gauge: gauge(2),
                type_id: GaugeTypeId(1),
                weight: 0,
            },
        ),
    ]
}

fn random_action(rng: &mut StdRng, now: u64) -> Action {
    // Account 100 is the admin, so some calls are authorized and some are not.
    let who = [1, 2, 3, 4, 100][rng.gen_range(0..5)];
    let account = acct(who);
    match rng.gen_range(0..16) {
        0 | 1 => Action::CreateLock {
            account,
            amount: rng.gen_range(1..500u128) * TOKEN / 10,
            unlock_time: now + rng.gen_range(0..120u64) * WEEK,
        },
        2 => Action::DepositFor {
            account,
            amount: rng.gen_range(1..50u128) * TOKEN,
        },
        3 => Action::IncreaseAmount {
            account,
            amount: rng.gen_range(1..50u128) * TOKEN,
        },
        4 => Action::IncreaseUnlockTime {
            account,
            unlock_time: now + rng.gen_range(0..200u64) * WEEK,
        },
        5 => Action::Withdraw { account },
        6 | 7 => Action::VoteForGaugeWeights {
            voter: account,
            gauge: gauge(rng.gen_range(1..4)),
            power: VotePower::new(rng.gen_range(0..=10_000)).unwrap_or(VotePower::ZERO),
        },
        8 => Action::ChangeTypeWeight {
            caller: account,
            type_id: GaugeTypeId(rng.gen_range(0..2)),
            weight: rng.gen_range(0..10),
        },
        9 => Action::ReceiveRevenue {
            amount: rng.gen_range(0..20u128) * TOKEN,
        },
        10 => Action::CheckpointToken { caller: account },
        11 => Action::Claim { account },
        12 => Action::ClaimMany {
            accounts: (1..=rng.gen_range(1..5)).map(acct).collect(),
        },
        13 => Action::ToggleAllowCheckpointToken { caller: account },
        14 => match rng.gen_range(0..4) {
            0 => Action::CheckpointEscrow,
            1 => Action::CheckpointGauge {
                gauge: gauge(rng.gen_range(1..3)),
            },
            2 => Action::CheckpointGaugeTypes,
            _ => Action::CheckpointTotalSupply,
        },
        // Rare: the walk keeps going after a kill, exercising the killed paths.
        _ if who == 100 && rng.gen_ratio(1, 4) => Action::KillFees { caller: account },
        _ => Action::CheckpointEscrow,
    }
}

fn random_trace(seed: u64, steps: usize) -> Vec<TimedAction> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut trace = preamble();
    let mut ts = W0 + 1;
    let mut block = 1_000;
    for _ in 0..steps {
        let dt = match rng.gen_range(0..4) {
            0 => 0,
            1 => rng.gen_range(1..DAY),
            2 => rng.gen_range(DAY..WEEK),
            _ => rng.gen_range(WEEK..5 * WEEK),
        };
        ts += dt;
        block += dt / 12;
        trace.push(TimedAction::new(
            ChainTime::new(ts, block),
            random_action(&mut rng, ts),
        ));
    }
    trace
}

#[test]
fn random_walks_hold_every_invariant() {
    let sys = system();
    for seed in 0..24 {
        let trace = random_trace(seed, 150);
        let found = first_invariant_counterexample_v1(&sys, &trace).unwrap();
        if let Some(ce) = found {
            let min = minimize_counterexample_v1(&sys, &ce).unwrap();
            panic!(
                "seed {seed}: {}\n{}\nminimized to {} actions: {:#?}",
                ce.short(),
                ce.violation,
                min.actions.len(),
                min.actions
            );
        }
    }
}

#[test]
fn replaying_a_walk_is_deterministic() {
    let trace = random_trace(7, 80);
    let mut a = system();
    let mut b = system();
    let gate = AllowAllGate;
    for step in &trace {
        let ra = a.apply(&gate, step.now, step.action.clone());
        let rb = b.apply(&gate, step.now, step.action.clone());
        assert_eq!(ra, rb);
    }
    assert_eq!(a.state_hash_v1().unwrap(), b.state_hash_v1().unwrap());
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}
