//! `keel run` command implementation.
//!
//! Scripted lifecycle: genesis commitments, launch, curve purchases, a keeper
//! sweep, LP staking, swap mining, a vesting claim, redemption, and a treasury
//! deposit, with the event log and invariant report at the end.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::{load_params, wad_str};
use keel_core::{AccountId, DepositId, Protocol, TokenId, WAD};

pub fn run(
    committers: u32,
    events_out: Option<PathBuf>,
    format: String,
    config_path: Option<PathBuf>,
) -> Result<()> {
    if format != "human" && format != "json" {
        anyhow::bail!("unknown format: {format} (expected 'human' or 'json')");
    }
    let human = format == "human";
    let committers = committers.max(1);

    let params = load_params(config_path)?;
    let gov = AccountId::named(&params.accounts.governor);
    let mut protocol = Protocol::new(params.clone())?;

    let committer = |i: u32| AccountId::named(&format!("committer-{}", i % committers));

    // Genesis
    if human {
        println!("⚓ Genesis auction ({} committers)", committers);
        println!();
    }
    protocol.init_genesis(gov)?;
    let mut committed_total: u128 = 0;
    for i in 0..committers {
        let who = committer(i);
        let amount = (i as u128 + 1) * 10_000 * WAD;
        protocol.mint(gov, TokenId::Reserve, who, amount)?;
        protocol.genesis_purchase(who, who, amount)?;
        committed_total += amount;
        if human {
            println!("   committer-{} committed {} reserve", i, wad_str(amount));
        }
    }

    protocol.advance_time(params.genesis.duration);
    protocol.launch(gov)?;
    let (pool_reserve, pool_stable) = protocol.reserves(TokenId::Reserve, TokenId::Stable)?;
    if human {
        println!();
        println!("🚀 Launched");
        println!("   committed: {}", wad_str(committed_total));
        println!(
            "   main pool: {} reserve / {} stable",
            wad_str(pool_reserve),
            wad_str(pool_stable)
        );
        println!();
    }

    for i in 0..committers {
        let who = committer(i);
        let amounts = protocol.genesis_redeem(who)?;
        if human {
            println!(
                "   committer-{} redeemed {} stable + {} governance",
                i,
                wad_str(amounts.stable),
                wad_str(amounts.governance)
            );
        }
    }

    // Bonding curve and keeper sweep
    let buyer = committer(0);
    protocol.mint(gov, TokenId::Reserve, buyer, 2_000 * WAD)?;
    let minted = protocol.curve_purchase(buyer, buyer, 1_000 * WAD, 0, protocol.now())?;
    protocol.advance_time(params.curve.incentive_interval);
    let keeper = AccountId::named("keeper");
    let allocated = protocol.curve_allocate(keeper)?;
    let keeper_fee = protocol.balance_of(TokenId::Stable, keeper);
    if human {
        println!();
        println!("💱 Bonding curve");
        println!("   purchase: 1000.00 reserve -> {} stable", wad_str(minted));
        println!(
            "   keeper swept {} reserve into liquidity (fee {} stable)",
            wad_str(allocated),
            wad_str(keeper_fee)
        );
        println!();
    }

    // LP staking and vesting
    let lp = TokenId::Lp(protocol.main_pair());
    let pool = protocol.add_farm_pool(gov, lp, 100)?;
    let outcome = protocol.add_liquidity(
        buyer,
        TokenId::Reserve,
        TokenId::Stable,
        500 * WAD,
        1_000 * WAD,
        0,
        0,
    )?;
    protocol.farm_deposit(buyer, pool, outcome.liquidity)?;
    protocol.advance_blocks(100);
    let pending = protocol.farm_pending(pool, buyer)?;
    protocol.farm_withdraw(buyer, pool, 0)?;
    protocol.advance_time(params.vesting.epoch_length);
    let released = protocol.claim(buyer)?;
    let (still_vesting, _) = protocol.vesting_amounts(buyer)?;
    if human {
        println!("🌾 Staking farm");
        println!(
            "   staked {} LP, earned {} over 100 blocks",
            wad_str(outcome.liquidity),
            wad_str(pending)
        );
        println!(
            "   claimed {} after one epoch, {} still vesting",
            wad_str(released),
            wad_str(still_vesting)
        );
        println!();
    }

    // Swap mining: seed a stable/governance pool, price it, trade against it
    protocol.mint(gov, TokenId::Stable, gov, 1_000 * WAD)?;
    protocol.mint(gov, TokenId::Gov, gov, 5_000 * WAD)?;
    protocol.create_pair(TokenId::Stable, TokenId::Gov)?;
    protocol.add_liquidity(
        gov,
        TokenId::Stable,
        TokenId::Gov,
        1_000 * WAD,
        5_000 * WAD,
        0,
        0,
    )?;
    protocol.update_oracle(TokenId::Stable, TokenId::Gov)?;
    protocol.advance_time(params.oracle.twap_period);
    protocol.update_oracle(TokenId::Stable, TokenId::Gov)?;
    protocol.add_swap_pool(gov, TokenId::Stable, TokenId::Gov, 100)?;
    protocol.add_whitelist(gov, TokenId::Stable)?;
    protocol.add_whitelist(gov, TokenId::Gov)?;

    let taker = committer(1);
    let swapped = protocol.swap(taker, TokenId::Stable, TokenId::Gov, 100 * WAD, 0)?;
    protocol.advance_blocks(10);
    let mined = protocol.taker_claim(taker)?;
    if human {
        println!("🔁 Swap mining");
        println!(
            "   swapped 100.00 stable -> {} governance",
            wad_str(swapped)
        );
        println!("   {} reward locked for the taker", wad_str(mined));
        println!();
    }

    // Redemption
    let redeemer = committer(2);
    let redeemed = protocol.redeem_purchase(redeemer, redeemer, 100 * WAD, 0, protocol.now())?;
    if human {
        println!("🔥 Redemption");
        println!(
            "   burned 100.00 stable -> {} governance",
            wad_str(redeemed)
        );
        println!();
    }

    // Treasury deposit: fund the deposit account, then trigger the pairing.
    let deposit_account = protocol.treasury_deposit_account(DepositId(0))?;
    protocol.mint(gov, TokenId::Reserve, buyer, 250 * WAD)?;
    protocol.transfer(buyer, TokenId::Reserve, deposit_account, 250 * WAD)?;
    protocol.pcv_deposit(DepositId(0), 250 * WAD)?;
    let (final_reserve, final_stable) = protocol.reserves(TokenId::Reserve, TokenId::Stable)?;

    // Wrap-up
    let violations = protocol.check_invariants();
    let chain_ok = protocol.verify_event_chain().is_ok();
    let event_count = protocol.events().len();

    if let Some(ref path) = events_out {
        let json = serde_json::to_string_pretty(protocol.events())?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        if human {
            println!("📝 Wrote {} events to {}", event_count, path.display());
            println!();
        }
    }

    if human {
        println!("📊 Summary");
        println!(
            "   stablecoin supply: {}",
            wad_str(protocol.total_supply(TokenId::Stable))
        );
        println!(
            "   governance supply: {}",
            wad_str(protocol.total_supply(TokenId::Gov))
        );
        println!(
            "   main pool: {} reserve / {} stable",
            wad_str(final_reserve),
            wad_str(final_stable)
        );
        println!(
            "   events: {} (chain {})",
            event_count,
            if chain_ok { "ok" } else { "BROKEN" }
        );
        if violations.is_empty() {
            println!("   invariants: ✅ clean");
        } else {
            println!("   invariants: ❌ {} violation(s)", violations.len());
            for v in &violations {
                println!("      {}", v);
            }
        }
    } else {
        // Amounts exceed u64 and go out as decimal strings.
        println!(
            "{}",
            serde_json::json!({
                "committed": wad_str(committed_total),
                "pool_reserve": wad_str(final_reserve),
                "pool_stable": wad_str(final_stable),
                "stable_supply": wad_str(protocol.total_supply(TokenId::Stable)),
                "gov_supply": wad_str(protocol.total_supply(TokenId::Gov)),
                "events": event_count,
                "chain_ok": chain_ok,
                "violations": violations.len(),
            })
        );
    }

    if !violations.is_empty() || !chain_ok {
        anyhow::bail!("lifecycle run ended with invariant violations");
    }
    Ok(())
}
