//! `keel config` command implementations.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::{load_params, wad_str, ParamsFile};

pub fn validate(file: PathBuf) -> Result<()> {
    let content = fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed: ParamsFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    let params = parsed.resolve()?;

    println!("📄 Parameter Validation");
    println!();
    println!("   File: {}", file.display());
    println!("   Parse: ✅");
    println!("   Validate: ✅");
    println!();
    println!("   Genesis window: {} s", params.genesis.duration);
    println!("   Genesis cap: {} tokens", wad_str(params.genesis.cap));
    println!(
        "   Curve price: {}/{}",
        params.curve.price.numerator, params.curve.price.denominator
    );
    println!(
        "   Vesting: {} epochs of {} s",
        params.vesting.vesting_epochs, params.vesting.epoch_length
    );
    Ok(())
}

pub fn show(format: String, config_path: Option<PathBuf>) -> Result<()> {
    let params = load_params(config_path)?;
    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        "human" => {
            println!("⚙️  Effective parameters");
            println!();
            println!("   Genesis");
            println!("      duration: {} s", params.genesis.duration);
            println!("      exit delay: {} s", params.genesis.exit_window_delay);
            println!("      cap: {} tokens", wad_str(params.genesis.cap));
            println!(
                "      governance allocation: {} tokens",
                wad_str(params.genesis.governance_allocation)
            );
            println!("   Bonding curve");
            println!(
                "      price: {}/{}",
                params.curve.price.numerator, params.curve.price.denominator
            );
            println!(
                "      fee: {}/{}",
                params.curve.fee.numerator, params.curve.fee.denominator
            );
            println!(
                "      keeper incentive: {} every {} s",
                wad_str(params.curve.incentive_amount),
                params.curve.incentive_interval
            );
            println!(
                "      supply cap: {} tokens",
                wad_str(params.curve.stable_supply_cap)
            );
            println!("   Farms");
            println!(
                "      rewards/block: {} stake, {} volume",
                wad_str(params.farm.stake_reward_per_block),
                wad_str(params.farm.volume_reward_per_block)
            );
            println!(
                "      blocks: {}..{}",
                params.farm.start_block, params.farm.end_block
            );
            println!("   Vesting");
            println!(
                "      {} epochs of {} s",
                params.vesting.vesting_epochs, params.vesting.epoch_length
            );
            println!("   Redemption");
            println!(
                "      ratio: {}/{}, fee: {}/{}",
                params.redemption.ratio.numerator,
                params.redemption.ratio.denominator,
                params.redemption.fee.numerator,
                params.redemption.fee.denominator
            );
            println!("   Oracle");
            println!("      twap period: {} s", params.oracle.twap_period);
            println!("   Accounts");
            println!(
                "      governor: {}, treasury: {}",
                params.accounts.governor, params.accounts.treasury
            );
        }
        _ => anyhow::bail!("unknown format: {format} (expected 'human' or 'json')"),
    }
    Ok(())
}
