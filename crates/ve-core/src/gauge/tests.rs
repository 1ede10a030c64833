use super::*;
use crate::config::EscrowConfig;
use crate::escrow::VotingEscrow;
use crate::time::{DAY, MAX_LOCK_TIME, WEEK};

const TOKEN: u128 = 1_000_000_000_000_000_000;
const W0: Timestamp = 2_800 * WEEK;

fn acct(n: u64) -> AccountId {
    AccountId::from_low_u64_be(n)
}

fn gauge(n: u64) -> GaugeId {
    GaugeId::from_low_u64_be(n)
}

fn power(bps: u16) -> VotePower {
    VotePower::new(bps).unwrap()
}

fn admin() -> AccountId {
    acct(100)
}

fn slope_of(amount: u128) -> i128 {
    amount as i128 / MAX_LOCK_TIME as i128
}

/// Escrow with Alice (100 tokens) and Bob (300 tokens) locked until `W0 + 52 weeks`, and a
/// controller with one type of weight 1 holding gauges 1 and 2.
fn setup(config: GaugeConfig) -> (VotingEscrow, GaugeController, ChainTime) {
    let now = ChainTime::new(W0 + DAY, 1_000);
    let mut ve = VotingEscrow::new(EscrowConfig::default(), now).unwrap();
    ve.create_lock(acct(1), 100 * TOKEN, W0 + 52 * WEEK, now)
        .unwrap();
    ve.create_lock(acct(2), 300 * TOKEN, W0 + 52 * WEEK, now)
        .unwrap();

    let mut gc = GaugeController::new(admin(), config, now).unwrap();
    let t = gc.add_gauge_type(admin(), "liquidity", 1, now).unwrap();
    gc.add_gauge(admin(), gauge(1), t, 0, now).unwrap();
    gc.add_gauge(admin(), gauge(2), t, 0, now).unwrap();
    (ve, gc, now)
}

#[test]
fn admin_operations_are_gated() {
    let (_, mut gc, now) = setup(GaugeConfig::default());
    assert!(matches!(
        gc.add_gauge_type(acct(1), "x", 1, now),
        Err(VeError::Unauthorized(_))
    ));
    assert!(matches!(
        gc.add_gauge(acct(1), gauge(9), GaugeTypeId(0), 0, now),
        Err(VeError::Unauthorized(_))
    ));
    assert_eq!(
        gc.add_gauge(admin(), gauge(1), GaugeTypeId(0), 0, now),
        Err(VeError::GaugeExists { gauge: gauge(1) })
    );
    assert_eq!(
        gc.add_gauge(admin(), gauge(9), GaugeTypeId(7), 0, now),
        Err(VeError::UnknownGaugeType {
            type_id: GaugeTypeId(7)
        })
    );
    assert!(gc
        .add_gauge_type(admin(), "too heavy", MAX_TYPE_WEIGHT + 1, now)
        .is_err());
    assert_eq!(gc.n_gauge_types(), 1);
    assert_eq!(gc.n_gauges(), 2);
}

#[test]
fn ownership_transfer_is_two_step() {
    let (_, mut gc, _) = setup(GaugeConfig::default());
    assert!(gc.apply_transfer_ownership(admin()).is_err());
    gc.commit_transfer_ownership(admin(), acct(5)).unwrap();
    assert_eq!(gc.admin(), admin());
    assert!(gc.apply_transfer_ownership(acct(5)).is_err());
    gc.apply_transfer_ownership(admin()).unwrap();
    assert_eq!(gc.admin(), acct(5));
    assert_eq!(gc.future_admin(), None);
}

#[test]
fn relative_weights_follow_votes_from_next_week() {
    let (ve, mut gc, now) = setup(GaugeConfig::default());
    gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), VotePower::MAX, now)
        .unwrap();
    gc.vote_for_gauge_weights(&ve, acct(2), gauge(2), VotePower::MAX, now)
        .unwrap();

    // Nothing counts during the current week.
    assert_eq!(gc.gauge_relative_weight(gauge(1), now.ts).unwrap(), 0);
    assert_eq!(gc.total_weight_at(W0).unwrap(), 0);

    let next = W0 + WEEK;
    let bias_a = (slope_of(100 * TOKEN) * (51 * WEEK) as i128) as u128;
    let bias_b = (slope_of(300 * TOKEN) * (51 * WEEK) as i128) as u128;
    assert_eq!(gc.gauge_weight_at(gauge(1), next).unwrap(), bias_a);
    assert_eq!(gc.total_weight_at(next).unwrap(), bias_a + bias_b);

    let rel_a = gc.gauge_relative_weight(gauge(1), next).unwrap();
    let rel_b = gc.gauge_relative_weight(gauge(2), next + 3 * DAY).unwrap();
    assert_eq!(
        rel_a,
        mul_div_floor(bias_a, WEIGHT_PRECISION, bias_a + bias_b).unwrap()
    );
    assert!(rel_a + rel_b <= WEIGHT_PRECISION);
    assert!(rel_a + rel_b >= WEIGHT_PRECISION - 2);
    assert!(rel_a.abs_diff(WEIGHT_PRECISION / 4) < WEIGHT_PRECISION / 1_000_000);

    // Contributions decay with the locks and vanish at their end.
    assert_eq!(
        gc.gauge_weight_at(gauge(1), W0 + 27 * WEEK).unwrap(),
        (slope_of(100 * TOKEN) * (25 * WEEK) as i128) as u128
    );
    assert_eq!(gc.gauge_weight_at(gauge(1), W0 + 52 * WEEK).unwrap(), 0);
    assert_eq!(gc.gauge_relative_weight(gauge(1), W0 + 60 * WEEK).unwrap(), 0);

    assert!(matches!(
        gc.gauge_relative_weight(gauge(9), next),
        Err(VeError::UnknownGauge { .. })
    ));
}

#[test]
fn type_weights_scale_and_apply_at_week_boundaries() {
    let now = ChainTime::new(W0 + DAY, 1_000);
    let mut ve = VotingEscrow::new(EscrowConfig::default(), now).unwrap();
    ve.create_lock(acct(1), 100 * TOKEN, W0 + 20 * WEEK, now)
        .unwrap();
    ve.create_lock(acct(2), 100 * TOKEN, W0 + 20 * WEEK, now)
        .unwrap();

    let mut gc = GaugeController::new(admin(), GaugeConfig::default(), now).unwrap();
    let a = gc.add_gauge_type(admin(), "stable", 1, now).unwrap();
    let b = gc.add_gauge_type(admin(), "volatile", 3, now).unwrap();
    gc.add_gauge(admin(), gauge(1), a, 0, now).unwrap();
    gc.add_gauge(admin(), gauge(2), b, 0, now).unwrap();
    gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), VotePower::MAX, now)
        .unwrap();
    gc.vote_for_gauge_weights(&ve, acct(2), gauge(2), VotePower::MAX, now)
        .unwrap();

    let w1 = W0 + WEEK;
    assert_eq!(gc.gauge_relative_weight(gauge(1), w1).unwrap(), WEIGHT_PRECISION / 4);
    assert_eq!(gc.gauge_relative_weight(gauge(2), w1).unwrap(), WEIGHT_PRECISION * 3 / 4);

    let later = ChainTime::new(w1 + DAY, 2_000);
    gc.change_type_weight(admin(), b, 1, later).unwrap();
    assert_eq!(gc.get_type_weight(b).unwrap(), 1);
    assert_eq!(gc.type_weight_at(b, w1).unwrap(), 3);
    assert_eq!(gc.gauge_relative_weight(gauge(2), w1).unwrap(), WEIGHT_PRECISION * 3 / 4);
    assert_eq!(gc.gauge_relative_weight(gauge(2), w1 + WEEK).unwrap(), WEIGHT_PRECISION / 2);
}

#[test]
fn vote_power_budget_is_enforced() {
    let (ve, mut gc, now) = setup(GaugeConfig::default());
    gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), power(6_000), now)
        .unwrap();
    let before = gc.clone();
    assert_eq!(
        gc.vote_for_gauge_weights(&ve, acct(1), gauge(2), power(5_000), now),
        Err(VeError::PowerBudgetExceeded {
            used: 6_000,
            requested: 5_000
        })
    );
    assert_eq!(gc, before);
    assert_eq!(gc.vote_record(acct(1), gauge(2)), None);

    let cast = gc
        .vote_for_gauge_weights(&ve, acct(1), gauge(2), power(4_000), now)
        .unwrap();
    assert_eq!(cast.total_power_used, 10_000);
    assert_eq!(gc.vote_user_power(acct(1)), 10_000);

    let record = gc.vote_record(acct(1), gauge(1)).unwrap();
    assert_eq!(record.slope, slope_of(100 * TOKEN) * 6_000 / 10_000);
    assert_eq!(record.end, W0 + 52 * WEEK);
}

#[test]
fn revote_waits_for_cooldown_and_replaces_contribution() {
    let (ve, mut gc, now) = setup(GaugeConfig::default());
    gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), VotePower::MAX, now)
        .unwrap();

    let early = ChainTime::new(now.ts + 9 * DAY, 2_000);
    assert_eq!(
        gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), power(5_000), early),
        Err(VeError::VoteTooSoon {
            next_allowed: now.ts + 10 * DAY
        })
    );

    let ok = ChainTime::new(now.ts + 10 * DAY, 3_000);
    gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), power(0), ok)
        .unwrap();
    assert_eq!(gc.vote_user_power(acct(1)), 0);
    assert_eq!(gc.last_user_vote(acct(1), gauge(1)), ok.ts);

    // The withdrawn vote stops counting from the following week boundary.
    let w2 = W0 + 2 * WEEK;
    assert_eq!(gc.gauge_weight_at(gauge(1), w2).unwrap(), 0);
    assert!(gc.gauge_weight_at(gauge(1), W0 + WEEK).unwrap() > 0);
    assert_eq!(gc.total_weight_at(w2).unwrap(), 0);
    assert_eq!(gc.gauge_info(gauge(1)).unwrap().curve().slope_change(W0 + 52 * WEEK), 0);
}

#[test]
fn vote_requires_lock_past_next_week() {
    let now = ChainTime::new(W0 + DAY, 1_000);
    let mut ve = VotingEscrow::new(EscrowConfig::default(), now).unwrap();
    ve.create_lock(acct(3), TOKEN, W0 + WEEK, now).unwrap();
    let mut gc = GaugeController::new(admin(), GaugeConfig::default(), now).unwrap();
    let t = gc.add_gauge_type(admin(), "liquidity", 1, now).unwrap();
    gc.add_gauge(admin(), gauge(1), t, 0, now).unwrap();

    assert_eq!(
        gc.vote_for_gauge_weights(&ve, acct(3), gauge(1), VotePower::MAX, now),
        Err(VeError::LockExpiresTooSoon {
            lock_end: W0 + WEEK,
            next_week: W0 + WEEK
        })
    );
    assert!(matches!(
        gc.vote_for_gauge_weights(&ve, acct(4), gauge(1), VotePower::MAX, now),
        Err(VeError::LockExpiresTooSoon { .. })
    ));
    assert!(matches!(
        gc.vote_for_gauge_weights(&ve, acct(3), gauge(2), VotePower::MAX, now),
        Err(VeError::UnknownGauge { .. })
    ));
}

#[test]
fn admin_gauge_weight_override() {
    let (ve, mut gc, now) = setup(GaugeConfig::default());
    gc.vote_for_gauge_weights(&ve, acct(2), gauge(2), VotePower::MAX, now)
        .unwrap();
    let bias_b = gc.gauge_weight_at(gauge(2), W0 + WEEK).unwrap();

    gc.change_gauge_weight(admin(), gauge(1), bias_b, now).unwrap();
    assert_eq!(gc.get_gauge_weight(gauge(1)).unwrap(), bias_b);
    assert_eq!(gc.get_weights_sum_per_type(GaugeTypeId(0)).unwrap(), 2 * bias_b);
    assert_eq!(gc.get_total_weight().unwrap(), 2 * bias_b);
    assert_eq!(
        gc.gauge_relative_weight(gauge(1), W0 + WEEK).unwrap(),
        WEIGHT_PRECISION / 2
    );
}

#[test]
fn long_dormancy_needs_gauge_checkpoints_first() {
    let config = GaugeConfig {
        vote_cooldown_secs: 10 * DAY,
        max_replay_weeks: 5,
    };
    let (ve, mut gc, now) = setup(config);
    gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), VotePower::MAX, now)
        .unwrap();

    let later = ChainTime::new(now.ts + 10 * WEEK, 50_000);
    let before = gc.clone();
    assert_eq!(
        gc.vote_for_gauge_weights(&ve, acct(2), gauge(2), VotePower::MAX, later),
        Err(VeError::CheckpointBacklog {
            remaining_weeks: 10
        })
    );
    assert_eq!(gc, before);

    let first = gc.checkpoint_gauge(gauge(2), later).unwrap();
    assert!(!first.caught_up);
    let second = gc.checkpoint_gauge(gauge(2), later).unwrap();
    assert!(second.caught_up);
    gc.vote_for_gauge_weights(&ve, acct(2), gauge(2), VotePower::MAX, later)
        .unwrap();

    let week = W0 + 11 * WEEK;
    let rel = gc.gauge_relative_weight_write(gauge(1), week, later).unwrap()
        + gc.gauge_relative_weight(gauge(2), week).unwrap();
    assert!(rel <= WEIGHT_PRECISION && rel >= WEIGHT_PRECISION - 2);
}

#[test]
fn controller_state_survives_json_round_trip() {
    let (ve, mut gc, now) = setup(GaugeConfig::default());
    gc.vote_for_gauge_weights(&ve, acct(1), gauge(1), power(2_500), now)
        .unwrap();
    let json = serde_json::to_string(&gc).unwrap();
    let back: GaugeController = serde_json::from_str(&json).unwrap();
    assert_eq!(back, gc);
}
