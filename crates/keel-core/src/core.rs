use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::AccountId;
use crate::{KeelError, Result};

/// Protocol roles.
///
/// Roles are flat capabilities checked at the engine boundary; there is no
/// inheritance between them. The governor manages the role registry itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Parameter changes, launch, role management.
    Governor,
    /// Pause/unpause only.
    Guardian,
    /// Treasury (PCV) movements.
    PcvController,
    /// External mint authority (test/driver setup).
    Minter,
}

/// Pausable components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    BondingCurve,
    TreasuryDeposit,
    RedemptionUnit,
}

impl Component {
    fn name(self) -> &'static str {
        match self {
            Component::BondingCurve => "bonding curve",
            Component::TreasuryDeposit => "treasury deposit",
            Component::RedemptionUnit => "redemption unit",
        }
    }
}

/// Access and phase registry shared by all components.
///
/// Components query this value; none of them own it. The launch flag flips
/// exactly once, splitting the protocol lifetime into the genesis phase and
/// the post-genesis phase.
#[derive(Clone, Debug)]
pub struct Core {
    launched: bool,
    roles: BTreeMap<Role, BTreeSet<AccountId>>,
    paused: BTreeSet<Component>,
}

impl Core {
    /// Creates the registry with `governor` holding Governor and Minter.
    pub fn new(governor: AccountId) -> Core {
        let mut roles: BTreeMap<Role, BTreeSet<AccountId>> = BTreeMap::new();
        roles.entry(Role::Governor).or_default().insert(governor);
        roles.entry(Role::Minter).or_default().insert(governor);
        Core {
            launched: false,
            roles,
            paused: BTreeSet::new(),
        }
    }

    pub fn has_role(&self, role: Role, account: AccountId) -> bool {
        self.roles
            .get(&role)
            .map(|members| members.contains(&account))
            .unwrap_or(false)
    }

    pub fn grant_role(&mut self, role: Role, account: AccountId) {
        self.roles.entry(role).or_default().insert(account);
    }

    pub fn revoke_role(&mut self, role: Role, account: AccountId) {
        if let Some(members) = self.roles.get_mut(&role) {
            members.remove(&account);
        }
    }

    pub fn ensure_governor(&self, account: AccountId) -> Result<()> {
        if self.has_role(Role::Governor, account) {
            Ok(())
        } else {
            Err(KeelError::Unauthorized("not governor".into()))
        }
    }

    pub fn ensure_pcv_controller(&self, account: AccountId) -> Result<()> {
        if self.has_role(Role::PcvController, account) {
            Ok(())
        } else {
            Err(KeelError::Unauthorized("not pcv controller".into()))
        }
    }

    pub fn ensure_minter(&self, account: AccountId) -> Result<()> {
        if self.has_role(Role::Minter, account) {
            Ok(())
        } else {
            Err(KeelError::Unauthorized("not minter".into()))
        }
    }

    pub fn ensure_governor_or_guardian(&self, account: AccountId) -> Result<()> {
        if self.has_role(Role::Governor, account) || self.has_role(Role::Guardian, account) {
            Ok(())
        } else {
            Err(KeelError::Unauthorized("not governor or guardian".into()))
        }
    }

    pub fn has_launched(&self) -> bool {
        self.launched
    }

    /// Requires the post-genesis phase.
    pub fn ensure_launched(&self) -> Result<()> {
        if self.launched {
            Ok(())
        } else {
            Err(KeelError::Phase("still in genesis period".into()))
        }
    }

    /// Flips the launch flag. Callable exactly once.
    pub fn set_launched(&mut self) -> Result<()> {
        if self.launched {
            return Err(KeelError::AlreadyDone("launch already happened".into()));
        }
        self.launched = true;
        Ok(())
    }

    pub fn is_paused(&self, component: Component) -> bool {
        self.paused.contains(&component)
    }

    /// Requires `component` not paused. Checked before all other validation
    /// in pausable entry points.
    pub fn ensure_not_paused(&self, component: Component) -> Result<()> {
        if self.paused.contains(&component) {
            Err(KeelError::Paused(format!("{} is paused", component.name())))
        } else {
            Ok(())
        }
    }

    pub fn pause(&mut self, component: Component) {
        self.paused.insert(component);
    }

    pub fn unpause(&mut self, component: Component) {
        self.paused.remove(&component);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(name: &str) -> AccountId {
        AccountId::named(name)
    }

    #[test]
    fn governor_starts_with_governor_and_minter() {
        let core = Core::new(acct("gov"));
        assert!(core.has_role(Role::Governor, acct("gov")));
        assert!(core.has_role(Role::Minter, acct("gov")));
        assert!(!core.has_role(Role::Guardian, acct("gov")));
        assert!(!core.has_role(Role::Governor, acct("mallory")));
    }

    #[test]
    fn grant_and_revoke_round_trip() {
        let mut core = Core::new(acct("gov"));
        core.grant_role(Role::PcvController, acct("ctrl"));
        assert!(core.ensure_pcv_controller(acct("ctrl")).is_ok());
        core.revoke_role(Role::PcvController, acct("ctrl"));
        assert!(matches!(
            core.ensure_pcv_controller(acct("ctrl")),
            Err(KeelError::Unauthorized(_))
        ));
    }

    #[test]
    fn launch_flag_flips_exactly_once() {
        let mut core = Core::new(acct("gov"));
        assert!(matches!(
            core.ensure_launched(),
            Err(KeelError::Phase(_))
        ));
        core.set_launched().unwrap();
        assert!(core.ensure_launched().is_ok());
        assert!(matches!(
            core.set_launched(),
            Err(KeelError::AlreadyDone(_))
        ));
    }

    #[test]
    fn pause_blocks_and_unpause_restores() {
        let mut core = Core::new(acct("gov"));
        assert!(core.ensure_not_paused(Component::BondingCurve).is_ok());
        core.pause(Component::BondingCurve);
        assert!(matches!(
            core.ensure_not_paused(Component::BondingCurve),
            Err(KeelError::Paused(_))
        ));
        assert!(core.ensure_not_paused(Component::RedemptionUnit).is_ok());
        core.unpause(Component::BondingCurve);
        assert!(core.ensure_not_paused(Component::BondingCurve).is_ok());
    }
}
