//! Protocol parameters.
//!
//! Parameters are POLICY-SET (at genesis or by governance) and validated once
//! at engine construction; market-determined values (AMM prices, commitment
//! sizes, swap volume) enter through operations. Sources:
//! - programmatic defaults ([`ProtocolParams::default`])
//! - environment variables prefixed with `KEEL_`
//! - TOML/JSON files (drivers deserialize and validate)

use serde::{Deserialize, Serialize};

use crate::math::Ratio;
use crate::types::{Amount, WAD};
use crate::{KeelError, Result};

/// Complete parameter set for one protocol instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub genesis: GenesisParams,
    pub curve: CurveParams,
    pub farm: FarmParams,
    pub vesting: VestingParams,
    pub redemption: RedemptionParams,
    pub oracle: OracleParams,
    pub accounts: AccountParams,
}

/// Genesis auction parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisParams {
    /// Commitment window length in seconds, measured from `init_genesis`.
    pub duration: u64,
    /// Seconds after the window start at which emergency exits open.
    /// Must not undercut the window itself.
    pub exit_window_delay: u64,
    /// Maximum aggregate commitment treated as effective at launch.
    pub cap: Amount,
    /// Fixed governance allocation distributed pro-rata to committers.
    pub governance_allocation: Amount,
}

/// Bonding curve parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CurveParams {
    /// Issuance price: stablecoin per reserve unit.
    pub price: Ratio,
    /// Issuance fee, deducted from output.
    pub fee: Ratio,
    /// Stablecoin minted to the keeper that triggers an allocation sweep.
    pub incentive_amount: Amount,
    /// Minimum seconds between keeper incentives.
    pub incentive_interval: u64,
    /// Hard cap on total stablecoin supply the curve may mint up to.
    pub stable_supply_cap: Amount,
}

/// Reward schedule shared by both farm instances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FarmParams {
    pub stake_reward_per_block: Amount,
    pub volume_reward_per_block: Amount,
    pub start_block: u64,
    /// Accrual stops at this block (exclusive of later blocks).
    pub end_block: u64,
}

/// Epoch vesting parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VestingParams {
    /// Epoch length in seconds.
    pub epoch_length: u64,
    /// Number of epochs over which a tranche releases linearly.
    pub vesting_epochs: u64,
}

/// Stablecoin-to-governance redemption parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedemptionParams {
    /// Governance units per stablecoin unit.
    pub ratio: Ratio,
    /// Redemption fee, deducted from output.
    pub fee: Ratio,
}

/// TWAP oracle parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OracleParams {
    /// Minimum seconds between recorded observations.
    pub twap_period: u64,
}

/// Well-known account names (resolved to ids at engine construction).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountParams {
    pub governor: String,
    /// Destination for harvested treasury rewards.
    pub treasury: String,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        ProtocolParams {
            genesis: GenesisParams {
                duration: 7 * 86_400,
                exit_window_delay: 10 * 86_400,
                cap: 500_000_000 * WAD,
                governance_allocation: 1_000_000 * WAD,
            },
            curve: CurveParams {
                price: Ratio {
                    numerator: 105_000_000,
                    denominator: 100_000_000,
                },
                fee: Ratio {
                    numerator: 10,
                    denominator: 10_000,
                },
                incentive_amount: 10 * WAD,
                incentive_interval: 86_400,
                stable_supply_cap: 100_000_000_000 * WAD,
            },
            farm: FarmParams {
                stake_reward_per_block: 347_000_000_000_000_000,
                volume_reward_per_block: WAD,
                start_block: 0,
                end_block: 10_000_000,
            },
            vesting: VestingParams {
                epoch_length: 3 * 86_400,
                vesting_epochs: 60,
            },
            redemption: RedemptionParams {
                ratio: Ratio {
                    numerator: 5,
                    denominator: 1,
                },
                fee: Ratio {
                    numerator: 10,
                    denominator: 10_000,
                },
            },
            oracle: OracleParams { twap_period: 1_800 },
            accounts: AccountParams {
                governor: "governor".into(),
                treasury: "treasury".into(),
            },
        }
    }
}

impl ProtocolParams {
    pub fn builder() -> ProtocolParamsBuilder {
        ProtocolParamsBuilder::default()
    }

    /// Load parameters from environment variables.
    ///
    /// Supported overrides (all optional):
    /// - `KEEL_GENESIS_DURATION` - commitment window in seconds
    /// - `KEEL_GENESIS_CAP_WAD` - commitment cap in whole tokens
    /// - `KEEL_EPOCH_LENGTH` - vesting epoch length in seconds
    /// - `KEEL_VESTING_EPOCHS` - number of vesting epochs
    pub fn from_env() -> Result<Self> {
        let mut params = Self::default();

        if let Ok(v) = std::env::var("KEEL_GENESIS_DURATION") {
            params.genesis.duration = v
                .parse()
                .map_err(|e| KeelError::Config(format!("Invalid KEEL_GENESIS_DURATION: {e}")))?;
        }
        if let Ok(v) = std::env::var("KEEL_GENESIS_CAP_WAD") {
            let whole: u128 = v
                .parse()
                .map_err(|e| KeelError::Config(format!("Invalid KEEL_GENESIS_CAP_WAD: {e}")))?;
            params.genesis.cap = whole
                .checked_mul(WAD)
                .ok_or_else(|| KeelError::Config("KEEL_GENESIS_CAP_WAD too large".into()))?;
        }
        if let Ok(v) = std::env::var("KEEL_EPOCH_LENGTH") {
            params.vesting.epoch_length = v
                .parse()
                .map_err(|e| KeelError::Config(format!("Invalid KEEL_EPOCH_LENGTH: {e}")))?;
        }
        if let Ok(v) = std::env::var("KEEL_VESTING_EPOCHS") {
            params.vesting.vesting_epochs = v
                .parse()
                .map_err(|e| KeelError::Config(format!("Invalid KEEL_VESTING_EPOCHS: {e}")))?;
        }

        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.genesis.duration == 0 {
            return Err(KeelError::Config("genesis duration must be > 0".into()));
        }
        if self.genesis.exit_window_delay < self.genesis.duration {
            return Err(KeelError::Config(
                "exit window must not open before the commitment window ends".into(),
            ));
        }
        if self.genesis.cap == 0 {
            return Err(KeelError::Config("genesis cap must be > 0".into()));
        }
        if self.genesis.governance_allocation == 0 {
            return Err(KeelError::Config(
                "governance allocation must be > 0".into(),
            ));
        }
        if self.curve.price.numerator == 0 || self.curve.price.denominator == 0 {
            return Err(KeelError::Config(
                "curve price numerator and denominator must be > 0".into(),
            ));
        }
        self.curve.fee.validate_fee()?;
        if self.curve.incentive_interval == 0 {
            return Err(KeelError::Config("incentive interval must be > 0".into()));
        }
        if self.farm.end_block <= self.farm.start_block {
            return Err(KeelError::Config(
                "farm end block must be after start block".into(),
            ));
        }
        if self.vesting.epoch_length == 0 {
            return Err(KeelError::Config("epoch length must be > 0".into()));
        }
        if self.vesting.vesting_epochs == 0 {
            return Err(KeelError::Config("vesting epochs must be > 0".into()));
        }
        if self.redemption.ratio.numerator == 0 || self.redemption.ratio.denominator == 0 {
            return Err(KeelError::Config(
                "redemption ratio numerator and denominator must be > 0".into(),
            ));
        }
        self.redemption.fee.validate_fee()?;
        if self.oracle.twap_period == 0 {
            return Err(KeelError::Config("twap period must be > 0".into()));
        }
        if self.accounts.governor.is_empty() || self.accounts.treasury.is_empty() {
            return Err(KeelError::Config(
                "governor and treasury account names must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for `ProtocolParams`.
#[derive(Default)]
pub struct ProtocolParamsBuilder {
    params: Option<ProtocolParams>,
}

impl ProtocolParamsBuilder {
    fn params(&mut self) -> &mut ProtocolParams {
        self.params.get_or_insert_with(ProtocolParams::default)
    }

    pub fn genesis_duration(mut self, seconds: u64) -> Self {
        self.params().genesis.duration = seconds;
        self
    }

    pub fn exit_window_delay(mut self, seconds: u64) -> Self {
        self.params().genesis.exit_window_delay = seconds;
        self
    }

    pub fn genesis_cap(mut self, cap: Amount) -> Self {
        self.params().genesis.cap = cap;
        self
    }

    pub fn governance_allocation(mut self, amount: Amount) -> Self {
        self.params().genesis.governance_allocation = amount;
        self
    }

    pub fn curve_price(mut self, price: Ratio) -> Self {
        self.params().curve.price = price;
        self
    }

    pub fn curve_fee(mut self, fee: Ratio) -> Self {
        self.params().curve.fee = fee;
        self
    }

    pub fn incentive(mut self, amount: Amount, interval: u64) -> Self {
        self.params().curve.incentive_amount = amount;
        self.params().curve.incentive_interval = interval;
        self
    }

    pub fn rewards_per_block(mut self, stake: Amount, volume: Amount) -> Self {
        self.params().farm.stake_reward_per_block = stake;
        self.params().farm.volume_reward_per_block = volume;
        self
    }

    pub fn farm_blocks(mut self, start: u64, end: u64) -> Self {
        self.params().farm.start_block = start;
        self.params().farm.end_block = end;
        self
    }

    pub fn epoch_length(mut self, seconds: u64) -> Self {
        self.params().vesting.epoch_length = seconds;
        self
    }

    pub fn vesting_epochs(mut self, epochs: u64) -> Self {
        self.params().vesting.vesting_epochs = epochs;
        self
    }

    pub fn governor(mut self, name: impl Into<String>) -> Self {
        self.params().accounts.governor = name.into();
        self
    }

    pub fn treasury(mut self, name: impl Into<String>) -> Self {
        self.params().accounts.treasury = name.into();
        self
    }

    /// Build and validate the parameter set.
    pub fn build(mut self) -> Result<ProtocolParams> {
        let params = self.params().clone();
        params.validate()?;
        Ok(params)
    }
}
