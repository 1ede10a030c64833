use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Result, VeError};

pub const MAX_VOTE_POWER: u16 = 10_000;

/// 20-byte account-style address.
///
/// Serialized as a `0x`-prefixed lowercase hex string so it can key JSON maps.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Address whose last eight bytes hold `v` big-endian.
    pub fn from_low_u64_be(v: u64) -> Address {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&v.to_be_bytes());
        Address(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = VeError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(digits)
            .map_err(|e| VeError::InvalidInput(format!("address is not hex: {e}")))?;
        let bytes: [u8; 20] = raw.try_into().map_err(|v: Vec<u8>| {
            VeError::InvalidInput(format!("address must be 20 bytes, got {}", v.len()))
        })?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Holder of a lock and voter on gauges.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub Address);

impl AccountId {
    pub fn from_low_u64_be(v: u64) -> AccountId {
        AccountId(Address::from_low_u64_be(v))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Reward sink that competes for emission weight.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GaugeId(pub Address);

impl GaugeId {
    pub fn from_low_u64_be(v: u64) -> GaugeId {
        GaugeId(Address::from_low_u64_be(v))
    }
}

impl fmt::Display for GaugeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Index of a gauge type in registration order.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GaugeTypeId(pub u32);

impl fmt::Display for GaugeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Share of an account's voting power allocated to one gauge, in basis points
/// `[0, 10_000]` (correct-by-construction).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u16", into = "u16")]
pub struct VotePower(u16);

impl VotePower {
    pub const ZERO: VotePower = VotePower(0);
    pub const MAX: VotePower = VotePower(MAX_VOTE_POWER);

    /// Constructs a bounded vote power.
    ///
    /// Preconditions:
    /// - `v <= 10_000` (else returns an error; fail-closed).
    pub fn new(v: u16) -> Result<VotePower> {
        if v <= MAX_VOTE_POWER {
            Ok(VotePower(v))
        } else {
            Err(VeError::InvalidInput(format!(
                "vote power out of range: {v} > {MAX_VOTE_POWER}"
            )))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn as_u128(self) -> u128 {
        self.0 as u128
    }
}

impl TryFrom<u16> for VotePower {
    type Error = VeError;
    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        VotePower::new(value)
    }
}

impl From<VotePower> for u16 {
    fn from(p: VotePower) -> u16 {
        p.0
    }
}
