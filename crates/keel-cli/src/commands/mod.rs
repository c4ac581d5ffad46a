//! CLI command implementations.

pub mod config;
pub mod run;
pub mod simulate;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use keel_core::math::Ratio;
use keel_core::{ProtocolParams, WAD};

/// Keel parameter file (TOML).
///
/// Every field is optional; anything omitted keeps its built-in default.
/// Fields documented as "whole tokens" are scaled to 18 decimals on load,
/// per-block rewards are given in base units so sub-token rates stay exact.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsFile {
    /// Genesis commitment window in seconds.
    pub genesis_duration: Option<u64>,

    /// Seconds from window start until emergency exits open.
    pub exit_window_delay: Option<u64>,

    /// Commitment cap, whole reserve tokens.
    pub genesis_cap: Option<u64>,

    /// Governance allocation distributed at genesis, whole tokens.
    pub governance_allocation: Option<u64>,

    /// Bonding curve issuance price (stablecoin per reserve unit).
    pub curve_price: Option<RatioFile>,

    /// Bonding curve issuance fee.
    pub curve_fee: Option<RatioFile>,

    /// Keeper incentive per allocation sweep, whole stablecoins.
    pub incentive_amount: Option<u64>,

    /// Minimum seconds between keeper incentives.
    pub incentive_interval: Option<u64>,

    /// Hard cap on stablecoin supply, whole tokens.
    pub stable_supply_cap: Option<u64>,

    /// Staking farm reward per block, base units.
    pub stake_reward_per_block: Option<u64>,

    /// Volume farm reward per block, base units.
    pub volume_reward_per_block: Option<u64>,

    /// First block with farm accrual.
    pub farm_start_block: Option<u64>,

    /// Block at which farm accrual stops.
    pub farm_end_block: Option<u64>,

    /// Vesting epoch length in seconds.
    pub epoch_length: Option<u64>,

    /// Number of epochs a reward tranche vests over.
    pub vesting_epochs: Option<u64>,

    /// Governance units per stablecoin at redemption.
    pub redemption_ratio: Option<RatioFile>,

    /// Redemption fee.
    pub redemption_fee: Option<RatioFile>,

    /// Minimum seconds between oracle observations.
    pub twap_period: Option<u64>,

    /// Governor account name.
    pub governor: Option<String>,

    /// Treasury account name.
    pub treasury: Option<String>,
}

/// Fraction as written in parameter files.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RatioFile {
    pub numerator: u64,
    pub denominator: u64,
}

impl From<RatioFile> for Ratio {
    fn from(value: RatioFile) -> Ratio {
        Ratio {
            numerator: value.numerator as u128,
            denominator: value.denominator as u128,
        }
    }
}

impl ParamsFile {
    /// Overlays this file on the defaults and validates the result.
    pub fn resolve(&self) -> Result<ProtocolParams> {
        let mut params = ProtocolParams::default();

        let whole = |tokens: u64, what: &str| -> Result<u128> {
            (tokens as u128)
                .checked_mul(WAD)
                .with_context(|| format!("{what} too large"))
        };

        if let Some(v) = self.genesis_duration {
            params.genesis.duration = v;
        }
        if let Some(v) = self.exit_window_delay {
            params.genesis.exit_window_delay = v;
        }
        if let Some(v) = self.genesis_cap {
            params.genesis.cap = whole(v, "genesis_cap")?;
        }
        if let Some(v) = self.governance_allocation {
            params.genesis.governance_allocation = whole(v, "governance_allocation")?;
        }
        if let Some(v) = self.curve_price {
            params.curve.price = v.into();
        }
        if let Some(v) = self.curve_fee {
            params.curve.fee = v.into();
        }
        if let Some(v) = self.incentive_amount {
            params.curve.incentive_amount = whole(v, "incentive_amount")?;
        }
        if let Some(v) = self.incentive_interval {
            params.curve.incentive_interval = v;
        }
        if let Some(v) = self.stable_supply_cap {
            params.curve.stable_supply_cap = whole(v, "stable_supply_cap")?;
        }
        if let Some(v) = self.stake_reward_per_block {
            params.farm.stake_reward_per_block = v as u128;
        }
        if let Some(v) = self.volume_reward_per_block {
            params.farm.volume_reward_per_block = v as u128;
        }
        if let Some(v) = self.farm_start_block {
            params.farm.start_block = v;
        }
        if let Some(v) = self.farm_end_block {
            params.farm.end_block = v;
        }
        if let Some(v) = self.epoch_length {
            params.vesting.epoch_length = v;
        }
        if let Some(v) = self.vesting_epochs {
            params.vesting.vesting_epochs = v;
        }
        if let Some(v) = self.redemption_ratio {
            params.redemption.ratio = v.into();
        }
        if let Some(v) = self.redemption_fee {
            params.redemption.fee = v.into();
        }
        if let Some(v) = self.twap_period {
            params.oracle.twap_period = v;
        }
        if let Some(ref v) = self.governor {
            params.accounts.governor = v.clone();
        }
        if let Some(ref v) = self.treasury {
            params.accounts.treasury = v.clone();
        }

        params.validate().context("Invalid parameters")?;
        Ok(params)
    }
}

/// Load parameters from a TOML file, or fall back to the defaults.
pub fn load_params(path: Option<PathBuf>) -> Result<ProtocolParams> {
    let Some(path) = path else {
        return Ok(ProtocolParams::default());
    };
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: ParamsFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    file.resolve()
}

/// Renders a WAD-scaled amount with two decimal places.
pub fn wad_str(amount: u128) -> String {
    format!("{}.{:02}", amount / WAD, (amount % WAD) / (WAD / 100))
}
