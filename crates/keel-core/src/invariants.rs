//! Global consistency checks.
//!
//! Each check inspects committed state only and reports divergences instead
//! of panicking, so drivers can run the full battery after every operation
//! and surface all failures at once. [`crate::engine::Protocol::check_invariants`]
//! composes the checks here with the self-checks owned by individual
//! components.

use std::fmt;

use serde::Serialize;

use crate::amm::{pair_account, PairBook};
use crate::token::Bank;

/// Which global property a violation report refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum InvariantId {
    /// Per token, holder balances sum to the recorded total supply.
    LedgerConservation,
    /// Each pair account holds at least the reserves its pair records.
    PairReservesBacked,
    /// Farm per-pool share totals equal the sum over user positions.
    FarmSharesConsistent,
    /// The farm account holds exactly the staked tokens per pool.
    StakeCustody,
    /// The auction account balances match the commitment accounting.
    AuctionCustody,
    /// The vesting account holds exactly the unreleased locked rewards.
    VestingCustody,
    /// The event log hash chain verifies end to end.
    EventChainValid,
}

impl InvariantId {
    pub fn as_str(self) -> &'static str {
        match self {
            InvariantId::LedgerConservation => "ledger conservation",
            InvariantId::PairReservesBacked => "pair reserves backed",
            InvariantId::FarmSharesConsistent => "farm shares consistent",
            InvariantId::StakeCustody => "stake custody",
            InvariantId::AuctionCustody => "auction custody",
            InvariantId::VestingCustody => "vesting custody",
            InvariantId::EventChainValid => "event chain valid",
        }
    }
}

/// One failed check, with enough detail to localize the divergence.
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    pub id: InvariantId,
    pub details: String,
}

impl InvariantViolation {
    pub fn new(id: InvariantId, details: impl Into<String>) -> InvariantViolation {
        InvariantViolation {
            id,
            details: details.into(),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id.as_str(), self.details)
    }
}

/// Per token, holder balances must sum to the recorded total supply.
pub fn check_bank_conservation(bank: &Bank) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for token in bank.tokens() {
        let mut sum: u128 = 0;
        for (_, balance) in bank.holders(token) {
            sum = sum.saturating_add(balance);
        }
        let supply = bank.total_supply(token);
        if sum != supply {
            violations.push(InvariantViolation::new(
                InvariantId::LedgerConservation,
                format!(
                    "{}: holder sum {sum} diverges from total supply {supply}",
                    token.label()
                ),
            ));
        }
    }
    violations
}

/// Every pair account must hold at least the reserves its pair records.
/// Holding strictly more is tolerated: anyone can transfer tokens to a pair
/// account directly, and such donations stay outside the pricing math.
pub fn check_pair_backing(pairs: &PairBook, bank: &Bank) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for (id, pair) in pairs.iter() {
        let account = pair_account(*id);
        let balance0 = bank.balance_of(pair.token0, account);
        let balance1 = bank.balance_of(pair.token1, account);
        if balance0 < pair.reserve0 {
            violations.push(InvariantViolation::new(
                InvariantId::PairReservesBacked,
                format!(
                    "pair {}: {} balance {balance0} below recorded reserve {}",
                    id.short_hex(),
                    pair.token0.label(),
                    pair.reserve0
                ),
            ));
        }
        if balance1 < pair.reserve1 {
            violations.push(InvariantViolation::new(
                InvariantId::PairReservesBacked,
                format!(
                    "pair {}: {} balance {balance1} below recorded reserve {}",
                    id.short_hex(),
                    pair.token1.label(),
                    pair.reserve1
                ),
            ));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, TokenId, WAD};

    #[test]
    fn fresh_state_has_no_violations() {
        let bank = Bank::new();
        let pairs = PairBook::new();
        assert!(check_bank_conservation(&bank).is_empty());
        assert!(check_pair_backing(&pairs, &bank).is_empty());
    }

    #[test]
    fn draining_a_pair_account_is_flagged() {
        let mut bank = Bank::new();
        let mut pairs = PairBook::new();
        let provider = AccountId::named("provider");
        bank.mint(TokenId::Reserve, provider, 10_000 * WAD).unwrap();
        bank.mint(TokenId::Stable, provider, 10_000 * WAD).unwrap();
        let id = pairs.create(TokenId::Reserve, TokenId::Stable, 0).unwrap();
        pairs
            .add_liquidity(
                &mut bank,
                provider,
                TokenId::Reserve,
                TokenId::Stable,
                5_000 * WAD,
                5_000 * WAD,
                0,
                0,
                0,
            )
            .unwrap();
        assert!(check_pair_backing(&pairs, &bank).is_empty());

        // Move tokens out from under the pair without going through the book.
        bank.transfer(TokenId::Reserve, pair_account(id), provider, WAD)
            .unwrap();
        let violations = check_pair_backing(&pairs, &bank);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].id, InvariantId::PairReservesBacked);
    }

    #[test]
    fn donations_to_a_pair_account_are_tolerated() {
        let mut bank = Bank::new();
        let mut pairs = PairBook::new();
        let provider = AccountId::named("provider");
        bank.mint(TokenId::Reserve, provider, 10_000 * WAD).unwrap();
        bank.mint(TokenId::Stable, provider, 10_000 * WAD).unwrap();
        let id = pairs.create(TokenId::Reserve, TokenId::Stable, 0).unwrap();
        pairs
            .add_liquidity(
                &mut bank,
                provider,
                TokenId::Reserve,
                TokenId::Stable,
                5_000 * WAD,
                5_000 * WAD,
                0,
                0,
                0,
            )
            .unwrap();
        bank.transfer(TokenId::Stable, provider, pair_account(id), WAD)
            .unwrap();
        assert!(check_pair_backing(&pairs, &bank).is_empty());
    }
}
