use std::collections::BTreeMap;

use crate::math::{add_amount, sub_amount};
use crate::types::{AccountId, Amount, TokenId};
use crate::{KeelError, Result};

/// In-memory fungible-token ledgers.
///
/// The bank tracks balances, allowances and total supply per token and is the
/// single source of truth for custody; components re-read balances from here
/// instead of caching them. Minting authority is enforced at the engine
/// boundary (role checks), not in the bank itself.
#[derive(Clone, Debug, Default)]
pub struct Bank {
    balances: BTreeMap<(TokenId, AccountId), Amount>,
    allowances: BTreeMap<(TokenId, AccountId, AccountId), Amount>,
    supplies: BTreeMap<TokenId, Amount>,
}

impl Bank {
    pub fn new() -> Bank {
        Bank::default()
    }

    pub fn balance_of(&self, token: TokenId, account: AccountId) -> Amount {
        self.balances.get(&(token, account)).copied().unwrap_or(0)
    }

    pub fn total_supply(&self, token: TokenId) -> Amount {
        self.supplies.get(&token).copied().unwrap_or(0)
    }

    pub fn allowance(&self, token: TokenId, owner: AccountId, spender: AccountId) -> Amount {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or(0)
    }

    /// Credits `amount` to `to` and grows total supply.
    pub fn mint(&mut self, token: TokenId, to: AccountId, amount: Amount) -> Result<()> {
        let new_supply = add_amount(self.total_supply(token), amount)?;
        let new_balance = add_amount(self.balance_of(token, to), amount)?;
        self.supplies.insert(token, new_supply);
        self.balances.insert((token, to), new_balance);
        Ok(())
    }

    /// Debits `amount` from `from` and shrinks total supply.
    pub fn burn(&mut self, token: TokenId, from: AccountId, amount: Amount) -> Result<()> {
        let balance = self.balance_of(token, from);
        if balance < amount {
            return Err(KeelError::InsufficientFunds(format!(
                "burn {amount} exceeds balance {balance}"
            )));
        }
        let new_supply = sub_amount(self.total_supply(token), amount)?;
        self.balances.insert((token, from), balance - amount);
        self.supplies.insert(token, new_supply);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        token: TokenId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()> {
        let from_balance = self.balance_of(token, from);
        if from_balance < amount {
            return Err(KeelError::InsufficientFunds(format!(
                "transfer {amount} exceeds balance {from_balance}"
            )));
        }
        self.balances.insert((token, from), from_balance - amount);
        let new_to = add_amount(self.balance_of(token, to), amount)?;
        self.balances.insert((token, to), new_to);
        Ok(())
    }

    pub fn approve(
        &mut self,
        token: TokenId,
        owner: AccountId,
        spender: AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.allowances.insert((token, owner, spender), amount);
        Ok(())
    }

    /// Spends `spender`'s allowance to move `owner`'s funds.
    pub fn transfer_from(
        &mut self,
        token: TokenId,
        spender: AccountId,
        owner: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()> {
        let allowed = self.allowance(token, owner, spender);
        if allowed < amount {
            return Err(KeelError::Unauthorized(format!(
                "allowance {allowed} below transfer {amount}"
            )));
        }
        // Validate the balance before touching the allowance.
        let from_balance = self.balance_of(token, owner);
        if from_balance < amount {
            return Err(KeelError::InsufficientFunds(format!(
                "transfer {amount} exceeds balance {from_balance}"
            )));
        }
        self.allowances
            .insert((token, owner, spender), allowed - amount);
        self.transfer(token, owner, to, amount)
    }

    /// Iterates `(account, balance)` entries of one token (for conservation checks).
    pub fn holders(&self, token: TokenId) -> impl Iterator<Item = (AccountId, Amount)> + '_ {
        self.balances
            .iter()
            .filter(move |((t, _), _)| *t == token)
            .map(|((_, account), amount)| (*account, *amount))
    }

    /// All tokens that ever had supply (for conservation checks).
    pub fn tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.supplies.keys().copied()
    }
}
