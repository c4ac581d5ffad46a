//! Constant-product pair book.
//!
//! Pairs hold their reserves in the ledger under a derived pair account; the
//! book tracks reserve mirrors and cumulative prices for TWAP consumers. LP
//! shares are ordinary ledger tokens (`TokenId::Lp`), so conservation checks
//! cover them like any other balance.

use std::collections::BTreeMap;

use crate::hash::sha256_domain;
use crate::math::{isqrt_u256, mul_div_floor, U256};
use crate::token::Bank;
use crate::types::{AccountId, Amount, PairId, TokenId, WAD};
use crate::{KeelError, Result};

/// LP shares burned to a locked account on first mint, per constant-product
/// convention. Keeps the pool alive after full withdrawal.
pub const MINIMUM_LIQUIDITY: u128 = 1_000;

/// Swap fee retained by the pool, in thousandths.
pub const SWAP_FEE_NUMERATOR: u128 = 3;
pub const SWAP_FEE_DENOMINATOR: u128 = 1_000;

const PAIR_ACCOUNT_DOMAIN_V1: &[u8] = b"KEEL_PAIR_ACCOUNT_V1";

/// Ledger account holding a pair's pooled reserves.
pub fn pair_account(pair: PairId) -> AccountId {
    AccountId(sha256_domain(PAIR_ACCOUNT_DOMAIN_V1, &pair.0 .0))
}

/// Ledger account holding permanently locked first-mint LP shares.
pub fn locked_account() -> AccountId {
    AccountId::named("keel/locked")
}

/// One constant-product pair. `token0 < token1` in canonical order.
#[derive(Clone, Debug)]
pub struct Pair {
    pub token0: TokenId,
    pub token1: TokenId,
    pub reserve0: Amount,
    pub reserve1: Amount,
    /// WAD-scaled cumulative prices. Wrap on overflow by design; TWAP
    /// readers difference them, so wrapped values stay usable.
    pub price0_cumulative: u128,
    pub price1_cumulative: u128,
    pub updated_at: u64,
}

impl Pair {
    /// Reserves oriented so the first element corresponds to `token_a`.
    pub fn reserves_for(&self, token_a: TokenId) -> Result<(Amount, Amount)> {
        if token_a == self.token0 {
            Ok((self.reserve0, self.reserve1))
        } else if token_a == self.token1 {
            Ok((self.reserve1, self.reserve0))
        } else {
            Err(KeelError::NotFound("token not in pair".into()))
        }
    }

    /// Cumulative prices extrapolated to `now` against the standing
    /// reserves, without mutating the pair. Oracle reads go through this so
    /// a quiet pair still reports time-weighted accumulation.
    pub fn cumulatives_at(&self, now: u64) -> (u128, u128) {
        if now <= self.updated_at || self.reserve0 == 0 || self.reserve1 == 0 {
            return (self.price0_cumulative, self.price1_cumulative);
        }
        let elapsed = (now - self.updated_at) as u128;
        let inc0 = U256::from(self.reserve1) * U256::from(WAD) / U256::from(self.reserve0)
            * U256::from(elapsed);
        let inc1 = U256::from(self.reserve0) * U256::from(WAD) / U256::from(self.reserve1)
            * U256::from(elapsed);
        (
            self.price0_cumulative.wrapping_add(truncate_u256(inc0)),
            self.price1_cumulative.wrapping_add(truncate_u256(inc1)),
        )
    }

    /// Advances cumulative prices over the time elapsed since the last
    /// update, using the reserves as they stood over that interval. Must run
    /// before any reserve change.
    fn accrue_prices(&mut self, now: u64) {
        let (cum0, cum1) = self.cumulatives_at(now);
        self.price0_cumulative = cum0;
        self.price1_cumulative = cum1;
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Amounts actually taken and LP shares minted by `add_liquidity`.
#[derive(Clone, Copy, Debug)]
pub struct AddLiquidityOutcome {
    pub amount_a: Amount,
    pub amount_b: Amount,
    pub liquidity: Amount,
}

/// Registry of constant-product pairs.
#[derive(Clone, Debug, Default)]
pub struct PairBook {
    pairs: BTreeMap<PairId, Pair>,
}

impl PairBook {
    pub fn new() -> PairBook {
        PairBook::default()
    }

    /// Registers a pair for an unordered token pair.
    pub fn create(&mut self, a: TokenId, b: TokenId, now: u64) -> Result<PairId> {
        if a == b {
            return Err(KeelError::InvalidInput("identical tokens".into()));
        }
        let id = PairId::derive(a, b);
        if self.pairs.contains_key(&id) {
            return Err(KeelError::AlreadyDone("pair exists".into()));
        }
        let (token0, token1) = if a <= b { (a, b) } else { (b, a) };
        self.pairs.insert(
            id,
            Pair {
                token0,
                token1,
                reserve0: 0,
                reserve1: 0,
                price0_cumulative: 0,
                price1_cumulative: 0,
                updated_at: now,
            },
        );
        Ok(id)
    }

    pub fn get(&self, pair: PairId) -> Result<&Pair> {
        self.pairs
            .get(&pair)
            .ok_or_else(|| KeelError::NotFound("unknown pair".into()))
    }

    fn get_mut(&mut self, pair: PairId) -> Result<&mut Pair> {
        self.pairs
            .get_mut(&pair)
            .ok_or_else(|| KeelError::NotFound("unknown pair".into()))
    }

    pub fn get_by_tokens(&self, a: TokenId, b: TokenId) -> Result<(PairId, &Pair)> {
        let id = PairId::derive(a, b);
        Ok((id, self.get(id)?))
    }

    pub fn exists(&self, a: TokenId, b: TokenId) -> bool {
        self.pairs.contains_key(&PairId::derive(a, b))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PairId, &Pair)> {
        self.pairs.iter()
    }

    /// Deposits up to the desired amounts at the pool ratio and mints LP
    /// shares to `provider`. On an empty pool the desired amounts are taken
    /// as-is and `MINIMUM_LIQUIDITY` shares are locked forever.
    #[allow(clippy::too_many_arguments)]
    pub fn add_liquidity(
        &mut self,
        bank: &mut Bank,
        provider: AccountId,
        token_a: TokenId,
        token_b: TokenId,
        amount_a_desired: Amount,
        amount_b_desired: Amount,
        amount_a_min: Amount,
        amount_b_min: Amount,
        now: u64,
    ) -> Result<AddLiquidityOutcome> {
        let (id, pair) = self.get_by_tokens(token_a, token_b)?;
        let (reserve_a, reserve_b) = pair.reserves_for(token_a)?;

        let (amount_a, amount_b) = if reserve_a == 0 && reserve_b == 0 {
            (amount_a_desired, amount_b_desired)
        } else {
            let b_optimal = quote(amount_a_desired, reserve_a, reserve_b)?;
            if b_optimal <= amount_b_desired {
                if b_optimal < amount_b_min {
                    return Err(KeelError::Slippage("insufficient amount of token b".into()));
                }
                (amount_a_desired, b_optimal)
            } else {
                let a_optimal = quote(amount_b_desired, reserve_b, reserve_a)?;
                if a_optimal < amount_a_min {
                    return Err(KeelError::Slippage("insufficient amount of token a".into()));
                }
                (a_optimal, amount_b_desired)
            }
        };
        if amount_a == 0 || amount_b == 0 {
            return Err(KeelError::InvalidInput("zero liquidity amounts".into()));
        }

        let lp_token = TokenId::Lp(id);
        let lp_supply = bank.total_supply(lp_token);
        let pair = self.get_mut(id)?;
        let (amount0, amount1) = if token_a == pair.token0 {
            (amount_a, amount_b)
        } else {
            (amount_b, amount_a)
        };

        let liquidity = if lp_supply == 0 {
            let root = truncate_u256(isqrt_u256(U256::from(amount0) * U256::from(amount1)));
            if root <= MINIMUM_LIQUIDITY {
                return Err(KeelError::InsufficientFunds(
                    "insufficient initial liquidity".into(),
                ));
            }
            root - MINIMUM_LIQUIDITY
        } else {
            let by0 = mul_div_floor(amount0, lp_supply, pair.reserve0)?;
            let by1 = mul_div_floor(amount1, lp_supply, pair.reserve1)?;
            by0.min(by1)
        };
        if liquidity == 0 {
            return Err(KeelError::InsufficientFunds(
                "insufficient liquidity minted".into(),
            ));
        }

        // Commit.
        let pool = pair_account(id);
        bank.transfer(pair.token0, provider, pool, amount0)?;
        bank.transfer(pair.token1, provider, pool, amount1)?;
        pair.accrue_prices(now);
        pair.reserve0 = pair
            .reserve0
            .checked_add(amount0)
            .ok_or_else(|| KeelError::Math("reserve overflow".into()))?;
        pair.reserve1 = pair
            .reserve1
            .checked_add(amount1)
            .ok_or_else(|| KeelError::Math("reserve overflow".into()))?;
        if lp_supply == 0 {
            bank.mint(lp_token, locked_account(), MINIMUM_LIQUIDITY)?;
        }
        bank.mint(lp_token, provider, liquidity)?;

        Ok(AddLiquidityOutcome {
            amount_a,
            amount_b,
            liquidity,
        })
    }

    /// Burns `liquidity` LP shares from `provider` and pays out the pro-rata
    /// reserves. Returns `(amount_a, amount_b)` oriented to the arguments.
    #[allow(clippy::too_many_arguments)]
    pub fn remove_liquidity(
        &mut self,
        bank: &mut Bank,
        provider: AccountId,
        token_a: TokenId,
        token_b: TokenId,
        liquidity: Amount,
        amount_a_min: Amount,
        amount_b_min: Amount,
        now: u64,
    ) -> Result<(Amount, Amount)> {
        let (id, _) = self.get_by_tokens(token_a, token_b)?;
        let lp_token = TokenId::Lp(id);
        let lp_supply = bank.total_supply(lp_token);
        if liquidity == 0 || lp_supply == 0 {
            return Err(KeelError::InvalidInput("zero liquidity".into()));
        }

        let pair = self.get_mut(id)?;
        let amount0 = mul_div_floor(liquidity, pair.reserve0, lp_supply)?;
        let amount1 = mul_div_floor(liquidity, pair.reserve1, lp_supply)?;
        if amount0 == 0 || amount1 == 0 {
            return Err(KeelError::InsufficientFunds(
                "insufficient liquidity burned".into(),
            ));
        }
        let (amount_a, amount_b) = if token_a == pair.token0 {
            (amount0, amount1)
        } else {
            (amount1, amount0)
        };
        if amount_a < amount_a_min {
            return Err(KeelError::Slippage("insufficient amount of token a".into()));
        }
        if amount_b < amount_b_min {
            return Err(KeelError::Slippage("insufficient amount of token b".into()));
        }

        // Commit.
        bank.burn(lp_token, provider, liquidity)?;
        pair.accrue_prices(now);
        pair.reserve0 -= amount0;
        pair.reserve1 -= amount1;
        let pool = pair_account(id);
        bank.transfer(pair.token0, pool, provider, amount0)?;
        bank.transfer(pair.token1, pool, provider, amount1)?;

        Ok((amount_a, amount_b))
    }

    /// Swaps an exact `amount_in` of `token_in` for `token_out`, paying the
    /// output to `trader`. Applies the pool swap fee.
    pub fn swap(
        &mut self,
        bank: &mut Bank,
        trader: AccountId,
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
        min_amount_out: Amount,
        now: u64,
    ) -> Result<Amount> {
        if amount_in == 0 {
            return Err(KeelError::InvalidInput("zero input amount".into()));
        }
        let (id, pair) = self.get_by_tokens(token_in, token_out)?;
        let (reserve_in, reserve_out) = pair.reserves_for(token_in)?;
        if reserve_in == 0 || reserve_out == 0 {
            return Err(KeelError::InsufficientFunds("insufficient liquidity".into()));
        }
        let amount_out = get_amount_out(amount_in, reserve_in, reserve_out)?;
        if amount_out < min_amount_out {
            return Err(KeelError::Slippage("output below minimum".into()));
        }

        // Commit.
        let pool = pair_account(id);
        bank.transfer(token_in, trader, pool, amount_in)?;
        let pair = self.get_mut(id)?;
        pair.accrue_prices(now);
        if token_in == pair.token0 {
            pair.reserve0 = pair
                .reserve0
                .checked_add(amount_in)
                .ok_or_else(|| KeelError::Math("reserve overflow".into()))?;
            pair.reserve1 -= amount_out;
        } else {
            pair.reserve1 = pair
                .reserve1
                .checked_add(amount_in)
                .ok_or_else(|| KeelError::Math("reserve overflow".into()))?;
            pair.reserve0 -= amount_out;
        }
        bank.transfer(token_out, pool, trader, amount_out)?;
        Ok(amount_out)
    }
}

/// Pool-ratio quote: the `b`-side amount matching `amount_a` at current
/// reserves.
pub fn quote(amount_a: Amount, reserve_a: Amount, reserve_b: Amount) -> Result<Amount> {
    if reserve_a == 0 {
        return Err(KeelError::InsufficientFunds("insufficient liquidity".into()));
    }
    mul_div_floor(amount_a, reserve_b, reserve_a)
}

/// Fee-adjusted constant-product output for an exact input.
pub fn get_amount_out(amount_in: Amount, reserve_in: Amount, reserve_out: Amount) -> Result<Amount> {
    let in_with_fee =
        U256::from(amount_in) * U256::from(SWAP_FEE_DENOMINATOR - SWAP_FEE_NUMERATOR);
    let numerator = in_with_fee
        .checked_mul(U256::from(reserve_out))
        .ok_or_else(|| KeelError::Math("swap amount overflow".into()))?;
    let denominator =
        U256::from(reserve_in) * U256::from(SWAP_FEE_DENOMINATOR) + in_with_fee;
    let out = numerator / denominator;
    Ok(truncate_u256(out))
}

/// Low 128 bits of a `U256`. Callers rely on wrapping semantics (cumulative
/// prices) or have bounded the value already (sqrt results).
fn truncate_u256(x: U256) -> u128 {
    let bytes = x.to_big_endian();
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    u128::from_be_bytes(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (PairBook, Bank, AccountId) {
        let mut book = PairBook::new();
        let mut bank = Bank::new();
        let alice = AccountId::named("alice");
        book.create(TokenId::Reserve, TokenId::Stable, 0).unwrap();
        bank.mint(TokenId::Reserve, alice, 1_000_000 * WAD).unwrap();
        bank.mint(TokenId::Stable, alice, 1_000_000 * WAD).unwrap();
        (book, bank, alice)
    }

    #[test]
    fn create_rejects_duplicates_and_identical_tokens() {
        let mut book = PairBook::new();
        book.create(TokenId::Reserve, TokenId::Stable, 0).unwrap();
        assert!(matches!(
            book.create(TokenId::Stable, TokenId::Reserve, 0),
            Err(KeelError::AlreadyDone(_))
        ));
        assert!(matches!(
            book.create(TokenId::Gov, TokenId::Gov, 0),
            Err(KeelError::InvalidInput(_))
        ));
    }

    #[test]
    fn first_mint_locks_minimum_liquidity() {
        let (mut book, mut bank, alice) = setup();
        let out = book
            .add_liquidity(
                &mut bank,
                alice,
                TokenId::Reserve,
                TokenId::Stable,
                10_000 * WAD,
                10_500 * WAD,
                0,
                0,
                0,
            )
            .unwrap();
        assert_eq!(out.amount_a, 10_000 * WAD);
        assert_eq!(out.amount_b, 10_500 * WAD);
        assert_eq!(out.liquidity, 10_246_950_765_959_598_382_221);

        let id = PairId::derive(TokenId::Reserve, TokenId::Stable);
        let lp = TokenId::Lp(id);
        assert_eq!(bank.balance_of(lp, alice), out.liquidity);
        assert_eq!(bank.balance_of(lp, locked_account()), MINIMUM_LIQUIDITY);
        assert_eq!(bank.total_supply(lp), out.liquidity + MINIMUM_LIQUIDITY);
        assert_eq!(bank.balance_of(TokenId::Reserve, pair_account(id)), 10_000 * WAD);
    }

    #[test]
    fn subsequent_mint_follows_the_pool_ratio() {
        let (mut book, mut bank, alice) = setup();
        book.add_liquidity(
            &mut bank,
            alice,
            TokenId::Reserve,
            TokenId::Stable,
            1_000 * WAD,
            2_000 * WAD,
            0,
            0,
            0,
        )
        .unwrap();
        // Desired b is above the pool ratio; only the optimal amount is taken.
        let out = book
            .add_liquidity(
                &mut bank,
                alice,
                TokenId::Reserve,
                TokenId::Stable,
                100 * WAD,
                500 * WAD,
                100 * WAD,
                200 * WAD,
                0,
            )
            .unwrap();
        assert_eq!(out.amount_a, 100 * WAD);
        assert_eq!(out.amount_b, 200 * WAD);

        let id = PairId::derive(TokenId::Reserve, TokenId::Stable);
        let supply_before = bank.total_supply(TokenId::Lp(id)) - out.liquidity;
        // One tenth of the pool was added, so a tenth of prior supply mints.
        assert_eq!(out.liquidity, supply_before / 10);
    }

    #[test]
    fn add_liquidity_enforces_minimums() {
        let (mut book, mut bank, alice) = setup();
        book.add_liquidity(
            &mut bank,
            alice,
            TokenId::Reserve,
            TokenId::Stable,
            1_000 * WAD,
            1_000 * WAD,
            0,
            0,
            0,
        )
        .unwrap();
        let res = book.add_liquidity(
            &mut bank,
            alice,
            TokenId::Reserve,
            TokenId::Stable,
            100 * WAD,
            90 * WAD,
            100 * WAD,
            0,
            0,
        );
        assert!(matches!(res, Err(KeelError::Slippage(_))));
    }

    #[test]
    fn remove_returns_pro_rata_reserves() {
        let (mut book, mut bank, alice) = setup();
        let out = book
            .add_liquidity(
                &mut bank,
                alice,
                TokenId::Reserve,
                TokenId::Stable,
                1_000 * WAD,
                1_000 * WAD,
                0,
                0,
                0,
            )
            .unwrap();
        let (a, b) = book
            .remove_liquidity(
                &mut bank,
                alice,
                TokenId::Reserve,
                TokenId::Stable,
                out.liquidity,
                0,
                0,
                0,
            )
            .unwrap();
        // Everything but the locked share's backing comes home.
        assert_eq!(a, 1_000 * WAD - MINIMUM_LIQUIDITY);
        assert_eq!(b, 1_000 * WAD - MINIMUM_LIQUIDITY);

        let id = PairId::derive(TokenId::Reserve, TokenId::Stable);
        assert_eq!(book.get(id).unwrap().reserve0, MINIMUM_LIQUIDITY);
        assert_eq!(bank.total_supply(TokenId::Lp(id)), MINIMUM_LIQUIDITY);
    }

    #[test]
    fn swap_applies_the_fee_and_grows_k() {
        let (mut book, mut bank, alice) = setup();
        book.add_liquidity(
            &mut bank,
            alice,
            TokenId::Reserve,
            TokenId::Stable,
            1_000,
            1_000,
            0,
            0,
            0,
        )
        .unwrap();
        let out = book
            .swap(
                &mut bank,
                alice,
                TokenId::Reserve,
                TokenId::Stable,
                100,
                0,
                0,
            )
            .unwrap();
        assert_eq!(out, 90);

        let id = PairId::derive(TokenId::Reserve, TokenId::Stable);
        let pair = book.get(id).unwrap();
        assert!(pair.reserve0 * pair.reserve1 >= 1_000 * 1_000);
        assert!(matches!(
            book.swap(&mut bank, alice, TokenId::Reserve, TokenId::Stable, 100, 1_000, 0),
            Err(KeelError::Slippage(_))
        ));
    }

    #[test]
    fn cumulative_prices_accrue_over_time() {
        let (mut book, mut bank, alice) = setup();
        book.add_liquidity(
            &mut bank,
            alice,
            TokenId::Reserve,
            TokenId::Stable,
            1_000 * WAD,
            2_000 * WAD,
            0,
            0,
            0,
        )
        .unwrap();
        // Touch the pair 10 seconds later; the interval accrues at 2:1.
        book.swap(&mut bank, alice, TokenId::Reserve, TokenId::Stable, WAD, 0, 10)
            .unwrap();
        let id = PairId::derive(TokenId::Reserve, TokenId::Stable);
        let pair = book.get(id).unwrap();
        assert_eq!(pair.price0_cumulative, 2 * WAD * 10);
        assert_eq!(pair.price1_cumulative, WAD / 2 * 10);
        assert_eq!(pair.updated_at, 10);
    }

    #[test]
    fn swap_on_unknown_pair_is_not_found() {
        let (mut book, mut bank, alice) = setup();
        assert!(matches!(
            book.swap(&mut bank, alice, TokenId::Gov, TokenId::Stable, 100, 0, 0),
            Err(KeelError::NotFound(_))
        ));
    }
}
