//! Trade-volume mining.
//!
//! Swap volume, measured in anchor-token units, is credited as farm shares.
//! Shares keep earning until the trader claims; a claim consumes the whole
//! recorded volume, so future rewards require fresh trades. Only swaps whose
//! input and output are both whitelisted count, which keeps self-dealing
//! through throwaway tokens out of the meter.

use std::collections::{BTreeMap, BTreeSet};

use crate::farm::{RewardPools, RewardSchedule};
use crate::math::add_amount;
use crate::types::{AccountId, Amount, PairId, PoolId, TokenId};
use crate::{KeelError, Result};

#[derive(Clone, Debug)]
pub struct SwapMining {
    rewards: RewardPools,
    pairs: Vec<PairId>,
    pool_by_pair: BTreeMap<PairId, PoolId>,
    whitelist: BTreeSet<TokenId>,
    anchor: TokenId,
}

impl SwapMining {
    pub fn new(schedule: RewardSchedule, anchor: TokenId) -> Result<SwapMining> {
        Ok(SwapMining {
            rewards: RewardPools::new(schedule)?,
            pairs: Vec::new(),
            pool_by_pair: BTreeMap::new(),
            whitelist: BTreeSet::new(),
            anchor,
        })
    }

    /// Unit of account for recorded volume.
    pub fn anchor(&self) -> TokenId {
        self.anchor
    }

    pub fn rewards(&self) -> &RewardPools {
        &self.rewards
    }

    pub fn rewards_mut(&mut self) -> &mut RewardPools {
        &mut self.rewards
    }

    /// Registers a pair for volume mining.
    pub fn add_pool(
        &mut self,
        pair: PairId,
        weight: u64,
        block: u64,
        max_pools: usize,
    ) -> Result<PoolId> {
        if self.pool_by_pair.contains_key(&pair) {
            return Err(KeelError::AlreadyDone("pool exists for pair".into()));
        }
        let pool = self.rewards.add_pool(weight, block, max_pools)?;
        self.pairs.push(pair);
        self.pool_by_pair.insert(pair, pool);
        Ok(pool)
    }

    pub fn pool_of(&self, pair: PairId) -> Option<PoolId> {
        self.pool_by_pair.get(&pair).copied()
    }

    pub fn pair_of(&self, pool: PoolId) -> Result<PairId> {
        self.pairs
            .get(pool.0 as usize)
            .copied()
            .ok_or_else(|| KeelError::NotFound("unknown farm pool".into()))
    }

    pub fn pool_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn add_whitelist(&mut self, token: TokenId, max_tokens: usize) -> Result<()> {
        if self.whitelist.contains(&token) {
            return Err(KeelError::AlreadyDone("token already whitelisted".into()));
        }
        if self.whitelist.len() >= max_tokens {
            return Err(KeelError::Capacity("too many whitelisted tokens".into()));
        }
        self.whitelist.insert(token);
        Ok(())
    }

    pub fn remove_whitelist(&mut self, token: TokenId) -> Result<()> {
        if !self.whitelist.remove(&token) {
            return Err(KeelError::NotFound("token not whitelisted".into()));
        }
        Ok(())
    }

    pub fn is_whitelisted(&self, token: TokenId) -> bool {
        self.whitelist.contains(&token)
    }

    /// Snapshot of the whitelist for route searching.
    pub fn whitelist_tokens(&self) -> Vec<TokenId> {
        self.whitelist.iter().copied().collect()
    }

    /// Credits anchor-unit volume for a swap on `pair`.
    ///
    /// Returns `Ok(None)` when the pair is not registered or the quantity is
    /// zero; the swap itself must still succeed in that case. On success the
    /// settled reward from any prior volume is returned for the caller to
    /// pay out.
    pub fn record(
        &mut self,
        pair: PairId,
        account: AccountId,
        quantity: Amount,
        block: u64,
    ) -> Result<Option<Amount>> {
        let Some(pool) = self.pool_of(pair) else {
            return Ok(None);
        };
        if quantity == 0 {
            return Ok(None);
        }
        let settled = self.rewards.add_shares(pool, account, quantity, block)?;
        Ok(Some(settled))
    }

    /// Claims across every pool: settles rewards and consumes the recorded
    /// volume. Returns the total settled amount.
    pub fn settle_all(&mut self, account: AccountId, block: u64) -> Result<Amount> {
        let mut total: Amount = 0;
        for i in 0..self.pool_count() {
            let pool = PoolId(i as u32);
            let shares = self.rewards.shares(pool, account);
            if shares > 0 {
                let settled = self.rewards.remove_shares(pool, account, shares, block)?;
                total = add_amount(total, settled)?;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mining() -> SwapMining {
        SwapMining::new(
            RewardSchedule {
                reward_per_block: 100,
                start_block: 0,
                end_block: 1_000,
            },
            TokenId::Gov,
        )
        .unwrap()
    }

    fn pair() -> PairId {
        PairId::derive(TokenId::Gov, TokenId::Stable)
    }

    fn alice() -> AccountId {
        AccountId::named("alice")
    }

    #[test]
    fn whitelist_roundtrip() {
        let mut m = mining();
        m.add_whitelist(TokenId::Gov, 32).unwrap();
        assert!(m.is_whitelisted(TokenId::Gov));
        assert!(matches!(
            m.add_whitelist(TokenId::Gov, 32),
            Err(KeelError::AlreadyDone(_))
        ));
        m.remove_whitelist(TokenId::Gov).unwrap();
        assert!(matches!(
            m.remove_whitelist(TokenId::Gov),
            Err(KeelError::NotFound(_))
        ));
    }

    #[test]
    fn whitelist_is_bounded() {
        let mut m = mining();
        m.add_whitelist(TokenId::Gov, 1).unwrap();
        assert!(matches!(
            m.add_whitelist(TokenId::Stable, 1),
            Err(KeelError::Capacity(_))
        ));
    }

    #[test]
    fn duplicate_pool_is_rejected() {
        let mut m = mining();
        m.add_pool(pair(), 100, 0, 64).unwrap();
        assert!(matches!(
            m.add_pool(pair(), 100, 0, 64),
            Err(KeelError::AlreadyDone(_))
        ));
    }

    #[test]
    fn record_skips_unregistered_pairs() {
        let mut m = mining();
        assert_eq!(m.record(pair(), alice(), 50, 0).unwrap(), None);
        m.add_pool(pair(), 100, 0, 64).unwrap();
        assert_eq!(m.record(pair(), alice(), 0, 0).unwrap(), None);
        assert_eq!(m.record(pair(), alice(), 50, 0).unwrap(), Some(0));
    }

    #[test]
    fn claim_consumes_volume() {
        let mut m = mining();
        let pool = m.add_pool(pair(), 100, 0, 64).unwrap();
        m.record(pair(), alice(), 50, 0).unwrap();
        assert_eq!(m.settle_all(alice(), 10).unwrap(), 1_000);
        assert_eq!(m.rewards().shares(pool, alice()), 0);
        // No fresh volume, no further reward.
        assert_eq!(m.settle_all(alice(), 20).unwrap(), 0);
    }

    #[test]
    fn mid_stream_record_settles_prior_volume() {
        let mut m = mining();
        m.add_pool(pair(), 100, 0, 64).unwrap();
        m.record(pair(), alice(), 50, 0).unwrap();
        let settled = m.record(pair(), alice(), 50, 10).unwrap();
        assert_eq!(settled, Some(1_000));
    }
}
