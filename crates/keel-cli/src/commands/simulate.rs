//! `keel simulate` command implementation.
//!
//! Drives random operation sequences against a launched protocol and runs
//! the full invariant suite after every step. Individual operations are
//! allowed to fail (that is half the point); what must never happen is a
//! failed invariant or an `Internal` error escaping the kernel.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tracing::debug;

use super::load_params;
use keel_core::{
    AccountId, Amount, DepositId, KeelError, PoolId, Protocol, ProtocolParams, TokenId, WAD,
};

pub fn run(
    seed: u64,
    steps: u32,
    runs: u32,
    actors: u32,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let params = load_params(config_path)?;
    let actors = actors.max(1);

    for i in 0..runs {
        let run_seed = seed ^ 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(i as u64 + 1);
        debug!(run = i, seed = run_seed, "starting simulation run");
        run_once(&params, run_seed, steps, actors)?;
    }

    println!("No invariant violations found (runs={runs}, steps={steps}, actors={actors}).");
    Ok(())
}

/// One operation in a generated trace.
#[derive(Clone, Debug)]
enum SimOp {
    AdvanceTime(u64),
    AdvanceBlocks(u64),
    TopUp { actor: u32, amount: Amount },
    CurvePurchase { actor: u32, amount: Amount },
    SwapMain { actor: u32, reserve_in: bool, amount: Amount },
    SwapGov { actor: u32, stable_in: bool, amount: Amount },
    AddLiquidity { actor: u32, reserve: Amount, stable: Amount },
    RemoveLiquidity { actor: u32, liquidity: Amount },
    FarmDeposit { actor: u32, amount: Amount },
    FarmWithdraw { actor: u32, amount: Amount },
    TakerClaim { actor: u32 },
    Claim { actor: u32 },
    Redeem { actor: u32, amount: Amount },
    PcvDeposit { actor: u32, amount: Amount },
    PcvRemove { liquidity: Amount },
    Allocate { actor: u32 },
    UpdateOracle,
}

struct World {
    gov: AccountId,
    actors: Vec<AccountId>,
    stake_pool: PoolId,
    lp: TokenId,
}

fn run_once(params: &ProtocolParams, run_seed: u64, steps: u32, actors: u32) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(run_seed);
    let mut protocol = Protocol::new(params.clone())?;
    let world = bootstrap(&mut protocol, params, actors)?;

    for step in 0..steps {
        let Some(op) = next_op(&mut rng, &protocol, &world) else {
            continue;
        };
        debug!(step, ?op, "applying");

        if let Err(KeelError::Internal(msg)) = apply(&mut protocol, &world, &op) {
            println!("❌ Internal error (seed={run_seed}, step={step})");
            println!("   op: {:?}", op);
            anyhow::bail!("kernel internal error: {msg}");
        }

        let violations = protocol.check_invariants();
        if !violations.is_empty() {
            println!("❌ Invariant violation (seed={run_seed}, step={step})");
            println!("   op: {:?}", op);
            for v in &violations {
                println!("   {}", v);
            }
            anyhow::bail!("invariant violation after {} steps", step + 1);
        }
    }
    Ok(())
}

/// Launches the protocol and seeds every surface the trace can reach:
/// funded actors, a staking pool, a priced stable/governance pair with a
/// volume pool, and the treasury controller role.
fn bootstrap(protocol: &mut Protocol, params: &ProtocolParams, actors: u32) -> Result<World> {
    let gov = AccountId::named(&params.accounts.governor);
    let actors: Vec<AccountId> = (0..actors)
        .map(|i| AccountId::named(&format!("actor-{i}")))
        .collect();

    protocol.init_genesis(gov)?;
    for &actor in &actors {
        protocol.mint(gov, TokenId::Reserve, actor, 100_000 * WAD)?;
        protocol.genesis_purchase(actor, actor, 50_000 * WAD)?;
    }
    protocol.advance_time(params.genesis.duration);
    protocol.launch(gov)?;
    for &actor in &actors {
        protocol.genesis_redeem(actor)?;
    }
    protocol.grant_role(gov, keel_core::core::Role::PcvController, gov)?;

    let lp = TokenId::Lp(protocol.main_pair());
    let stake_pool = protocol.add_farm_pool(gov, lp, 100)?;

    protocol.mint(gov, TokenId::Stable, gov, 10_000 * WAD)?;
    protocol.mint(gov, TokenId::Gov, gov, 50_000 * WAD)?;
    protocol.create_pair(TokenId::Stable, TokenId::Gov)?;
    protocol.add_liquidity(
        gov,
        TokenId::Stable,
        TokenId::Gov,
        10_000 * WAD,
        50_000 * WAD,
        0,
        0,
    )?;
    protocol.update_oracle(TokenId::Stable, TokenId::Gov)?;
    protocol.advance_time(params.oracle.twap_period);
    protocol.update_oracle(TokenId::Stable, TokenId::Gov)?;
    protocol.add_swap_pool(gov, TokenId::Stable, TokenId::Gov, 100)?;
    protocol.add_whitelist(gov, TokenId::Stable)?;
    protocol.add_whitelist(gov, TokenId::Gov)?;

    Ok(World {
        gov,
        actors,
        stake_pool,
        lp,
    })
}

/// Picks the next operation, peeking at balances so most generated
/// operations are actually applicable. Returns `None` when the drawn kind
/// has no applicable target this step.
fn next_op(rng: &mut StdRng, protocol: &Protocol, world: &World) -> Option<SimOp> {
    let actor_ix = rng.gen_range(0..world.actors.len()) as u32;
    let actor = world.actors[actor_ix as usize];
    let reserve_bal = protocol.balance_of(TokenId::Reserve, actor);
    let stable_bal = protocol.balance_of(TokenId::Stable, actor);

    let op = match rng.gen_range(0..17u32) {
        0 => SimOp::AdvanceTime(rng.gen_range(1..=6) * 3_600),
        1 => SimOp::AdvanceBlocks(rng.gen_range(1..=50)),
        2 => SimOp::TopUp {
            actor: actor_ix,
            amount: rng.gen_range(1..=1_000u128) * WAD,
        },
        3 => {
            if reserve_bal == 0 {
                return None;
            }
            SimOp::CurvePurchase {
                actor: actor_ix,
                amount: (reserve_bal / 4).max(1),
            }
        }
        4 => {
            let reserve_in = rng.gen_bool(0.5);
            let bal = if reserve_in { reserve_bal } else { stable_bal };
            if bal == 0 {
                return None;
            }
            SimOp::SwapMain {
                actor: actor_ix,
                reserve_in,
                amount: (bal / 8).max(1),
            }
        }
        5 => {
            let stable_in = rng.gen_bool(0.5);
            let bal = if stable_in {
                stable_bal
            } else {
                protocol.balance_of(TokenId::Gov, actor)
            };
            if bal == 0 {
                return None;
            }
            SimOp::SwapGov {
                actor: actor_ix,
                stable_in,
                amount: (bal / 8).max(1),
            }
        }
        6 => {
            if reserve_bal == 0 || stable_bal == 0 {
                return None;
            }
            SimOp::AddLiquidity {
                actor: actor_ix,
                reserve: (reserve_bal / 4).max(1),
                stable: stable_bal,
            }
        }
        7 => {
            let bal = protocol.balance_of(world.lp, actor);
            if bal == 0 {
                return None;
            }
            SimOp::RemoveLiquidity {
                actor: actor_ix,
                liquidity: (bal / 2).max(1),
            }
        }
        8 => {
            let bal = protocol.balance_of(world.lp, actor);
            if bal == 0 {
                return None;
            }
            SimOp::FarmDeposit {
                actor: actor_ix,
                amount: (bal / 2).max(1),
            }
        }
        9 => {
            let shares = protocol.farm_shares(world.stake_pool, actor).unwrap_or(0);
            SimOp::FarmWithdraw {
                actor: actor_ix,
                amount: shares / 2,
            }
        }
        10 => SimOp::TakerClaim { actor: actor_ix },
        11 => SimOp::Claim { actor: actor_ix },
        12 => {
            if stable_bal == 0 {
                return None;
            }
            SimOp::Redeem {
                actor: actor_ix,
                amount: (stable_bal / 10).max(1),
            }
        }
        13 => {
            if reserve_bal == 0 {
                return None;
            }
            SimOp::PcvDeposit {
                actor: actor_ix,
                amount: (reserve_bal / 10).max(1),
            }
        }
        14 => {
            let account = protocol.treasury_deposit_account(DepositId(0)).ok()?;
            let bal = protocol.balance_of(world.lp, account);
            if bal == 0 {
                return None;
            }
            SimOp::PcvRemove {
                liquidity: (bal / 8).max(1),
            }
        }
        15 => SimOp::Allocate { actor: actor_ix },
        _ => SimOp::UpdateOracle,
    };
    Some(op)
}

/// Applies one operation. Domain errors are expected and reported upward
/// untouched; the caller decides which ones matter.
fn apply(protocol: &mut Protocol, world: &World, op: &SimOp) -> keel_core::Result<()> {
    let actor = |ix: u32| world.actors[ix as usize];
    let now = protocol.now();
    match *op {
        SimOp::AdvanceTime(secs) => {
            protocol.advance_time(secs);
            Ok(())
        }
        SimOp::AdvanceBlocks(blocks) => {
            protocol.advance_blocks(blocks);
            Ok(())
        }
        SimOp::TopUp { actor: ix, amount } => {
            protocol.mint(world.gov, TokenId::Reserve, actor(ix), amount)
        }
        SimOp::CurvePurchase { actor: ix, amount } => protocol
            .curve_purchase(actor(ix), actor(ix), amount, 0, now)
            .map(|_| ()),
        SimOp::SwapMain {
            actor: ix,
            reserve_in,
            amount,
        } => {
            let (token_in, token_out) = if reserve_in {
                (TokenId::Reserve, TokenId::Stable)
            } else {
                (TokenId::Stable, TokenId::Reserve)
            };
            protocol
                .swap(actor(ix), token_in, token_out, amount, 0)
                .map(|_| ())
        }
        SimOp::SwapGov {
            actor: ix,
            stable_in,
            amount,
        } => {
            let (token_in, token_out) = if stable_in {
                (TokenId::Stable, TokenId::Gov)
            } else {
                (TokenId::Gov, TokenId::Stable)
            };
            protocol
                .swap(actor(ix), token_in, token_out, amount, 0)
                .map(|_| ())
        }
        SimOp::AddLiquidity {
            actor: ix,
            reserve,
            stable,
        } => protocol
            .add_liquidity(
                actor(ix),
                TokenId::Reserve,
                TokenId::Stable,
                reserve,
                stable,
                0,
                0,
            )
            .map(|_| ()),
        SimOp::RemoveLiquidity {
            actor: ix,
            liquidity,
        } => protocol
            .remove_liquidity(actor(ix), TokenId::Reserve, TokenId::Stable, liquidity, 0, 0)
            .map(|_| ()),
        SimOp::FarmDeposit { actor: ix, amount } => {
            protocol.farm_deposit(actor(ix), world.stake_pool, amount)
        }
        SimOp::FarmWithdraw { actor: ix, amount } => {
            protocol.farm_withdraw(actor(ix), world.stake_pool, amount)
        }
        SimOp::TakerClaim { actor: ix } => protocol.taker_claim(actor(ix)).map(|_| ()),
        SimOp::Claim { actor: ix } => protocol.claim(actor(ix)).map(|_| ()),
        SimOp::Redeem { actor: ix, amount } => protocol
            .redeem_purchase(actor(ix), actor(ix), amount, 0, now)
            .map(|_| ()),
        SimOp::PcvDeposit { actor: ix, amount } => {
            let account = protocol.treasury_deposit_account(DepositId(0))?;
            protocol.transfer(actor(ix), TokenId::Reserve, account, amount)?;
            protocol.pcv_deposit(DepositId(0), amount)
        }
        SimOp::PcvRemove { liquidity } => protocol
            .pcv_remove_liquidity(world.gov, DepositId(0), liquidity, 0, 0)
            .map(|_| ()),
        SimOp::Allocate { actor: ix } => protocol.curve_allocate(actor(ix)).map(|_| ()),
        SimOp::UpdateOracle => {
            protocol.update_oracle(TokenId::Reserve, TokenId::Stable)?;
            protocol.update_oracle(TokenId::Stable, TokenId::Gov)?;
            Ok(())
        }
    }
}
