#![no_main]

use libfuzzer_sys::fuzz_target;

use ve_core::system::invariant_rail::{first_invariant_counterexample_v1, TimedAction};
use ve_core::time::{DAY, WEEK};
use ve_core::{AccountId, Action, ChainTime, GaugeId, GaugeTypeId, VeConfig, VeSystem, VotePower};

const MAX_ACTIONS: usize = 96;
const W0: u64 = 2_800 * WEEK;
const TOKEN: u128 = 1_000_000_000_000_000_000;

struct Cursor<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, index: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.index.checked_add(n)?;
        if end > self.bytes.len() {
            return None;
        }
        let out = &self.bytes[self.index..end];
        self.index = end;
        Some(out)
    }

    fn take_u8(&mut self) -> Option<u8> {
        Some(*self.take(1)?.first()?)
    }

    fn take_u16_le(&mut self) -> Option<u16> {
        let s = self.take(2)?;
        Some(u16::from_le_bytes([s[0], s[1]]))
    }

    fn take_u64_le(&mut self) -> Option<u64> {
        let s = self.take(8)?;
        Some(u64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]]))
    }

    fn take_u128_le(&mut self) -> Option<u128> {
        let s = self.take(16)?;
        let mut out = [0u8; 16];
        out.copy_from_slice(s);
        Some(u128::from_le_bytes(out))
    }
}

fn acct(b: u8) -> AccountId {
    // Five lockers plus the admin (100).
    match b % 6 {
        5 => AccountId::from_low_u64_be(100),
        n => AccountId::from_low_u64_be(u64::from(n) + 1),
    }
}

fn gauge(b: u8) -> GaugeId {
    GaugeId::from_low_u64_be(u64::from(b % 3) + 1)
}

fn amount(c: &mut Cursor<'_>) -> Option<u128> {
    // Mostly realistic sizes, occasionally raw values that hit the overflow paths.
    let raw = c.take_u128_le()?;
    Some(if raw & 1 == 0 {
        (raw >> 1) % (1_000_000 * TOKEN)
    } else {
        raw >> 1
    })
}

fn decode_action(c: &mut Cursor<'_>, now: u64) -> Option<Action> {
    let tag = c.take_u8()?;
    let who = acct(c.take_u8()?);
    Some(match tag % 17 {
        0 => Action::CreateLock {
            account: who,
            amount: amount(c)?,
            unlock_time: now.saturating_add(c.take_u64_le()? % (210 * WEEK)),
        },
        1 => Action::DepositFor {
            account: who,
            amount: amount(c)?,
        },
        2 => Action::IncreaseAmount {
            account: who,
            amount: amount(c)?,
        },
        3 => Action::IncreaseUnlockTime {
            account: who,
            unlock_time: now.saturating_add(c.take_u64_le()? % (210 * WEEK)),
        },
        4 => Action::Withdraw { account: who },
        5 => Action::CheckpointEscrow,
        6 => Action::AddGaugeType {
            caller: who,
            name: "fuzz".into(),
            weight: u128::from(c.take_u16_le()?),
        },
        7 => Action::AddGauge {
            caller: who,
            gauge: gauge(c.take_u8()?),
            type_id: GaugeTypeId(u32::from(c.take_u8()? % 3)),
            weight: amount(c)?,
        },
        8 => Action::ChangeTypeWeight {
            caller: who,
            type_id: GaugeTypeId(u32::from(c.take_u8()? % 3)),
            weight: u128::from(c.take_u16_le()?),
        },
        9 => Action::ChangeGaugeWeight {
            caller: who,
            gauge: gauge(c.take_u8()?),
            weight: amount(c)?,
        },
        10 => Action::VoteForGaugeWeights {
            voter: who,
            gauge: gauge(c.take_u8()?),
            power: VotePower::new(c.take_u16_le()? % 10_001).ok()?,
        },
        11 => Action::CheckpointGauge {
            gauge: gauge(c.take_u8()?),
        },
        12 => Action::ReceiveRevenue { amount: amount(c)? },
        13 => Action::CheckpointToken { caller: who },
        14 => Action::Claim { account: who },
        15 => Action::ClaimMany {
            accounts: (0..c.take_u8()? % 8).map(acct).collect(),
        },
        _ => match c.take_u8()? % 8 {
            0 => Action::ToggleAllowCheckpointToken { caller: who },
            1 => Action::KillFees { caller: who },
            2 => Action::CheckpointGaugeTypes,
            3 => Action::CommitGaugeAdmin {
                caller: who,
                new_admin: acct(c.take_u8()?),
            },
            4 => Action::ApplyGaugeAdmin { caller: who },
            5 => Action::CommitFeeAdmin {
                caller: who,
                new_admin: acct(c.take_u8()?),
            },
            6 => Action::ApplyFeeAdmin { caller: who },
            _ => Action::CheckpointTotalSupply,
        },
    })
}

fuzz_target!(|data: &[u8]| {
    let mut c = Cursor::new(data);
    let Ok(initial) = VeSystem::new(
        AccountId::from_low_u64_be(100),
        AccountId::from_low_u64_be(101),
        VeConfig::default(),
        ChainTime::new(W0, 1_000),
    ) else {
        return;
    };

    let mut ts = W0;
    let mut block = 1_000u64;
    let mut trace = Vec::new();
    while trace.len() < MAX_ACTIONS {
        let Some(step) = c.take_u8() else { break };
        // Steps of zero, up to a day, or up to eight weeks.
        let dt = match step % 3 {
            0 => 0,
            1 => u64::from(step) * (DAY / 256),
            _ => u64::from(step) * (8 * WEEK / 256),
        };
        ts += dt;
        block += dt / 12;
        let Some(action) = decode_action(&mut c, ts) else { break };
        trace.push(TimedAction::new(ChainTime::new(ts, block), action));
    }

    match first_invariant_counterexample_v1(&initial, &trace) {
        Ok(None) => {}
        Ok(Some(ce)) => panic!("{}: {}", ce.short(), ce.violation),
        Err(e) => panic!("invariant rail failed: {e}"),
    }
});
