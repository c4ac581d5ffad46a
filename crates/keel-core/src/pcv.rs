//! Treasury deposits (protocol-controlled value).
//!
//! Each deposit is a ledger account that parks swept reserve as AMM
//! liquidity. The registry only tracks identity; balances live in the bank
//! and the deposit's LP position in the pair book, so custody is auditable
//! through the same conservation checks as everything else.

use std::collections::BTreeMap;

use crate::hash::sha256_domain;
use crate::math::{mul_div_floor, Ratio};
use crate::types::{AccountId, Amount, DepositId};
use crate::{KeelError, Result};

const DEPOSIT_ACCOUNT_DOMAIN_V1: &[u8] = b"KEEL_DEPOSIT_ACCOUNT_V1";

/// Ledger account owned by a treasury deposit.
pub fn deposit_account(id: DepositId) -> AccountId {
    AccountId(sha256_domain(DEPOSIT_ACCOUNT_DOMAIN_V1, &id.0.to_le_bytes()))
}

#[derive(Clone, Copy, Debug)]
pub struct TreasuryDeposit {
    pub id: DepositId,
    pub account: AccountId,
}

/// Registry of treasury deposits, ids assigned sequentially.
#[derive(Clone, Debug, Default)]
pub struct DepositBook {
    deposits: BTreeMap<u32, TreasuryDeposit>,
    next: u32,
}

impl DepositBook {
    pub fn new() -> DepositBook {
        DepositBook::default()
    }

    pub fn add(&mut self, max_deposits: usize) -> Result<DepositId> {
        if self.deposits.len() >= max_deposits {
            return Err(KeelError::Capacity("too many treasury deposits".into()));
        }
        let id = DepositId(self.next);
        self.next += 1;
        self.deposits.insert(
            id.0,
            TreasuryDeposit {
                id,
                account: deposit_account(id),
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: DepositId) -> Result<&TreasuryDeposit> {
        self.deposits
            .get(&id.0)
            .ok_or_else(|| KeelError::NotFound("unknown deposit".into()))
    }

    pub fn contains(&self, id: DepositId) -> bool {
        self.deposits.contains_key(&id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = DepositId> + '_ {
        self.deposits.keys().map(|k| DepositId(*k))
    }

    pub fn len(&self) -> usize {
        self.deposits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deposits.is_empty()
    }
}

/// Stablecoin amount to pair with `reserve_amount` when entering the pool.
///
/// A live pool dictates its own ratio; an empty pool falls back to the
/// oracle price.
pub fn stable_to_match(
    reserve_amount: Amount,
    pool_reserves: Option<(Amount, Amount)>,
    price: Ratio,
) -> Result<Amount> {
    match pool_reserves {
        Some((reserve, stable)) if reserve > 0 && stable > 0 => {
            mul_div_floor(reserve_amount, stable, reserve)
        }
        _ => price.mul_floor(reserve_amount),
    }
}
