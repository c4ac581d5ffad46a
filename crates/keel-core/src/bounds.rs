use crate::{KeelError, Result};

/// Runtime bounds for the in-memory kernel.
///
/// These are **safety bounds**, not economic parameters:
/// - they prevent unbounded memory/CPU usage (DoS resistance)
/// - they make redemption, allocation and claim costs predictable
///
/// Deployments may size these to expected participation, but they MUST
/// remain bounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeBounds {
    pub max_committers: usize,
    pub max_farm_pools: usize,
    pub max_allocation_targets: usize,
    pub max_tranches_per_account: usize,
    pub max_whitelist_tokens: usize,
    pub max_deposits: usize,
}

impl RuntimeBounds {
    pub const HARD_MAX_COMMITTERS: usize = 5_000_000;
    pub const HARD_MAX_FARM_POOLS: usize = 1024;
    pub const HARD_MAX_ALLOCATION_TARGETS: usize = 256;
    pub const HARD_MAX_TRANCHES_PER_ACCOUNT: usize = 100_000;
    pub const HARD_MAX_WHITELIST_TOKENS: usize = 1024;
    pub const HARD_MAX_DEPOSITS: usize = 256;

    /// Default: sized for large public genesis participation (configurable).
    pub const DEFAULT_MAX_COMMITTERS: usize = 500_000;
    /// Default: typical pool fanout per farm (configurable).
    pub const DEFAULT_MAX_FARM_POOLS: usize = 64;
    /// Default: bounded allocation sweep cost (configurable).
    pub const DEFAULT_MAX_ALLOCATION_TARGETS: usize = 16;
    /// Default: bounded per-claim work; fully-vested tranches merge, so the
    /// live count stays near `vesting_epochs` (configurable).
    pub const DEFAULT_MAX_TRANCHES_PER_ACCOUNT: usize = 4096;
    /// Default: bounded volume routing search (configurable).
    pub const DEFAULT_MAX_WHITELIST_TOKENS: usize = 32;
    /// Default: bounded treasury registry (configurable).
    pub const DEFAULT_MAX_DEPOSITS: usize = 16;

    pub fn new(
        max_committers: usize,
        max_farm_pools: usize,
        max_allocation_targets: usize,
        max_tranches_per_account: usize,
        max_whitelist_tokens: usize,
        max_deposits: usize,
    ) -> Result<Self> {
        let b = RuntimeBounds {
            max_committers,
            max_farm_pools,
            max_allocation_targets,
            max_tranches_per_account,
            max_whitelist_tokens,
            max_deposits,
        };
        b.validate()?;
        Ok(b)
    }

    pub fn validate(self) -> Result<()> {
        if self.max_committers == 0 || self.max_committers > Self::HARD_MAX_COMMITTERS {
            return Err(KeelError::Config(format!(
                "max_committers out of bounds: {}",
                self.max_committers
            )));
        }
        if self.max_farm_pools == 0 || self.max_farm_pools > Self::HARD_MAX_FARM_POOLS {
            return Err(KeelError::Config(format!(
                "max_farm_pools out of bounds: {}",
                self.max_farm_pools
            )));
        }
        if self.max_allocation_targets == 0
            || self.max_allocation_targets > Self::HARD_MAX_ALLOCATION_TARGETS
        {
            return Err(KeelError::Config(format!(
                "max_allocation_targets out of bounds: {}",
                self.max_allocation_targets
            )));
        }
        if self.max_tranches_per_account == 0
            || self.max_tranches_per_account > Self::HARD_MAX_TRANCHES_PER_ACCOUNT
        {
            return Err(KeelError::Config(format!(
                "max_tranches_per_account out of bounds: {}",
                self.max_tranches_per_account
            )));
        }
        if self.max_whitelist_tokens == 0
            || self.max_whitelist_tokens > Self::HARD_MAX_WHITELIST_TOKENS
        {
            return Err(KeelError::Config(format!(
                "max_whitelist_tokens out of bounds: {}",
                self.max_whitelist_tokens
            )));
        }
        if self.max_deposits == 0 || self.max_deposits > Self::HARD_MAX_DEPOSITS {
            return Err(KeelError::Config(format!(
                "max_deposits out of bounds: {}",
                self.max_deposits
            )));
        }
        Ok(())
    }
}

impl Default for RuntimeBounds {
    fn default() -> Self {
        Self {
            max_committers: Self::DEFAULT_MAX_COMMITTERS,
            max_farm_pools: Self::DEFAULT_MAX_FARM_POOLS,
            max_allocation_targets: Self::DEFAULT_MAX_ALLOCATION_TARGETS,
            max_tranches_per_account: Self::DEFAULT_MAX_TRANCHES_PER_ACCOUNT,
            max_whitelist_tokens: Self::DEFAULT_MAX_WHITELIST_TOKENS,
            max_deposits: Self::DEFAULT_MAX_DEPOSITS,
        }
    }
}
