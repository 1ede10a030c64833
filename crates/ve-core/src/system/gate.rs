use std::collections::BTreeSet;

use crate::types::AccountId;
use crate::{Result, VeError};

use super::actions::Action;
use super::VeSystem;

/// Authorization hook for state transitions.
///
/// [`VeSystem::apply`] calls `check()` before mutating anything. Gates are pure: they see the
/// current state and the proposed action, nothing else.
pub trait ActionGate {
    fn check(&self, sys: &VeSystem, action: &Action) -> Result<()>;
}

/// Gate that allows all actions (useful for simulation/tests).
pub struct AllowAllGate;

impl ActionGate for AllowAllGate {
    fn check(&self, _sys: &VeSystem, _action: &Action) -> Result<()> {
        Ok(())
    }
}

/// Gate that denies all actions (useful for tests).
pub struct DenyAllGate;

impl ActionGate for DenyAllGate {
    fn check(&self, _sys: &VeSystem, _action: &Action) -> Result<()> {
        Err(VeError::Unauthorized("gate denied action".into()))
    }
}

/// Restricts lock creation and lock changes to approved accounts; every other action passes.
#[derive(Clone, Debug, Default)]
pub struct LockerAllowlistGate {
    allowed: BTreeSet<AccountId>,
}

impl LockerAllowlistGate {
    pub fn new(allowed: impl IntoIterator<Item = AccountId>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn approve(&mut self, account: AccountId) {
        self.allowed.insert(account);
    }

    pub fn revoke(&mut self, account: AccountId) {
        self.allowed.remove(&account);
    }

    pub fn is_allowed(&self, account: AccountId) -> bool {
        self.allowed.contains(&account)
    }
}

impl ActionGate for LockerAllowlistGate {
    fn check(&self, _sys: &VeSystem, action: &Action) -> Result<()> {
        match action.locker() {
            Some(account) if !self.is_allowed(account) => Err(VeError::Unauthorized(format!(
                "{account} is not an approved locker"
            ))),
            _ => Ok(()),
        }
    }
}
