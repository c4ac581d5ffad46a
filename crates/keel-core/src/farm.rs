//! Block-metered reward pools.
//!
//! The accounting is the classic accumulator scheme: each pool tracks a
//! reward-per-share value scaled by [`ACC_PRECISION`], and each position
//! carries a debt marking the accumulator level it last settled at. Rewards
//! are virtual until settled; the engine mints on settlement, so nothing can
//! be stranded by emergency exits.
//!
//! Both farms run on this structure. The stake farm's shares are custodied
//! LP tokens; the volume farm's shares are recorded swap volume.

use std::collections::BTreeMap;

use crate::math::{add_amount, mul2_div2_floor, mul_div_floor, sub_amount};
use crate::types::{AccountId, Amount, PoolId};
use crate::{KeelError, Result};

/// Scale factor for accumulated reward-per-share values.
pub const ACC_PRECISION: u128 = 1_000_000_000_000;

/// Emission parameters shared by every pool of one farm.
#[derive(Clone, Copy, Debug)]
pub struct RewardSchedule {
    pub reward_per_block: Amount,
    pub start_block: u64,
    pub end_block: u64,
}

/// Per-pool accrual state.
#[derive(Clone, Debug)]
pub struct PoolState {
    pub weight: u64,
    pub last_reward_block: u64,
    pub acc_reward_per_share: u128,
    pub total_shares: u128,
}

/// One account's position in one pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserState {
    pub shares: u128,
    pub reward_debt: u128,
}

/// A weighted set of reward pools drawing from one emission schedule.
#[derive(Clone, Debug)]
pub struct RewardPools {
    schedule: RewardSchedule,
    total_weight: u64,
    pools: Vec<PoolState>,
    users: BTreeMap<(u32, AccountId), UserState>,
}

impl RewardPools {
    pub fn new(schedule: RewardSchedule) -> Result<RewardPools> {
        if schedule.end_block <= schedule.start_block {
            return Err(KeelError::Config(
                "farm end block must be after start block".into(),
            ));
        }
        Ok(RewardPools {
            schedule,
            total_weight: 0,
            pools: Vec::new(),
            users: BTreeMap::new(),
        })
    }

    pub fn schedule(&self) -> RewardSchedule {
        self.schedule
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn pool(&self, pool: PoolId) -> Result<&PoolState> {
        self.pools
            .get(pool.0 as usize)
            .ok_or_else(|| KeelError::NotFound("unknown farm pool".into()))
    }

    pub fn user(&self, pool: PoolId, account: AccountId) -> UserState {
        self.users
            .get(&(pool.0, account))
            .copied()
            .unwrap_or_default()
    }

    pub fn shares(&self, pool: PoolId, account: AccountId) -> u128 {
        self.user(pool, account).shares
    }

    /// Adds a pool. Existing pools are brought current first so the new
    /// weight cannot reprice already-elapsed blocks.
    pub fn add_pool(&mut self, weight: u64, block: u64, max_pools: usize) -> Result<PoolId> {
        if self.pools.len() >= max_pools {
            return Err(KeelError::Capacity("too many farm pools".into()));
        }
        let total = self
            .total_weight
            .checked_add(weight)
            .ok_or_else(|| KeelError::Math("weight overflow".into()))?;
        self.mass_update(block)?;
        self.total_weight = total;
        self.pools.push(PoolState {
            weight,
            last_reward_block: block.max(self.schedule.start_block),
            acc_reward_per_share: 0,
            total_shares: 0,
        });
        Ok(PoolId(self.pools.len() as u32 - 1))
    }

    pub fn set_pool_weight(&mut self, pool: PoolId, weight: u64, block: u64) -> Result<()> {
        let old = self.pool(pool)?.weight;
        let total = self
            .total_weight
            .checked_sub(old)
            .and_then(|t| t.checked_add(weight))
            .ok_or_else(|| KeelError::Math("weight overflow".into()))?;
        self.mass_update(block)?;
        self.total_weight = total;
        self.pools[pool.0 as usize].weight = weight;
        Ok(())
    }

    pub fn set_reward_per_block(&mut self, reward_per_block: Amount, block: u64) -> Result<()> {
        self.mass_update(block)?;
        self.schedule.reward_per_block = reward_per_block;
        Ok(())
    }

    pub fn set_end_block(&mut self, end_block: u64, block: u64) -> Result<()> {
        if end_block <= block || end_block <= self.schedule.start_block {
            return Err(KeelError::InvalidInput(
                "end block must be in the future".into(),
            ));
        }
        self.mass_update(block)?;
        self.schedule.end_block = end_block;
        Ok(())
    }

    pub fn mass_update(&mut self, block: u64) -> Result<()> {
        for i in 0..self.pools.len() {
            self.update_pool(PoolId(i as u32), block)?;
        }
        Ok(())
    }

    /// Accrues the pool's share of emissions since its last update.
    pub fn update_pool(&mut self, pool: PoolId, block: u64) -> Result<()> {
        self.pool(pool)?;
        let schedule = self.schedule;
        let total_weight = self.total_weight;
        let p = &mut self.pools[pool.0 as usize];
        if block <= p.last_reward_block {
            return Ok(());
        }
        if p.total_shares == 0 || p.weight == 0 || total_weight == 0 {
            p.last_reward_block = block;
            return Ok(());
        }
        let span = reward_span(&schedule, p.last_reward_block, block);
        if span > 0 {
            let pool_reward = mul2_div2_floor(
                schedule.reward_per_block,
                span as u128,
                p.weight as u128,
                total_weight as u128,
                1,
            )?;
            let delta = mul_div_floor(pool_reward, ACC_PRECISION, p.total_shares)?;
            p.acc_reward_per_share = add_amount(p.acc_reward_per_share, delta)?;
        }
        p.last_reward_block = block;
        Ok(())
    }

    /// Unsettled reward owed to `account` as of `block` (read-only).
    pub fn pending(&self, pool: PoolId, account: AccountId, block: u64) -> Result<Amount> {
        let p = self.pool(pool)?;
        let u = self.user(pool, account);
        let mut acc = p.acc_reward_per_share;
        if block > p.last_reward_block
            && p.total_shares > 0
            && p.weight > 0
            && self.total_weight > 0
        {
            let span = reward_span(&self.schedule, p.last_reward_block, block);
            if span > 0 {
                let pool_reward = mul2_div2_floor(
                    self.schedule.reward_per_block,
                    span as u128,
                    p.weight as u128,
                    self.total_weight as u128,
                    1,
                )?;
                acc = add_amount(acc, mul_div_floor(pool_reward, ACC_PRECISION, p.total_shares)?)?;
            }
        }
        let earned = mul_div_floor(u.shares, acc, ACC_PRECISION)?;
        sub_amount(earned, u.reward_debt)
    }

    /// Settles pending reward without touching shares. Returns the amount,
    /// which the caller is responsible for paying out.
    pub fn settle(&mut self, pool: PoolId, account: AccountId, block: u64) -> Result<Amount> {
        self.update_pool(pool, block)?;
        let acc = self.pools[pool.0 as usize].acc_reward_per_share;
        let key = (pool.0, account);
        let prev = self.users.get(&key).copied().unwrap_or_default();
        let earned = mul_div_floor(prev.shares, acc, ACC_PRECISION)?;
        let owed = sub_amount(earned, prev.reward_debt)?;
        if prev.shares == 0 && earned == 0 {
            self.users.remove(&key);
        } else {
            self.users.insert(
                key,
                UserState {
                    shares: prev.shares,
                    reward_debt: earned,
                },
            );
        }
        Ok(owed)
    }

    /// Settles, then adds shares. Returns the settled reward.
    pub fn add_shares(
        &mut self,
        pool: PoolId,
        account: AccountId,
        amount: Amount,
        block: u64,
    ) -> Result<Amount> {
        self.pool(pool)?;
        let settled = self.settle(pool, account, block)?;
        let acc = self.pools[pool.0 as usize].acc_reward_per_share;
        let key = (pool.0, account);
        let prev = self.users.get(&key).copied().unwrap_or_default();
        let shares = add_amount(prev.shares, amount)?;
        let reward_debt = mul_div_floor(shares, acc, ACC_PRECISION)?;
        let total_shares = add_amount(self.pools[pool.0 as usize].total_shares, amount)?;
        // Commit.
        self.users.insert(key, UserState { shares, reward_debt });
        self.pools[pool.0 as usize].total_shares = total_shares;
        Ok(settled)
    }

    /// Settles, then removes shares. Returns the settled reward.
    pub fn remove_shares(
        &mut self,
        pool: PoolId,
        account: AccountId,
        amount: Amount,
        block: u64,
    ) -> Result<Amount> {
        self.pool(pool)?;
        let prev_shares = self.shares(pool, account);
        if amount > prev_shares {
            return Err(KeelError::InsufficientFunds(
                "withdraw exceeds staked shares".into(),
            ));
        }
        let settled = self.settle(pool, account, block)?;
        let acc = self.pools[pool.0 as usize].acc_reward_per_share;
        let key = (pool.0, account);
        let shares = prev_shares - amount;
        let reward_debt = mul_div_floor(shares, acc, ACC_PRECISION)?;
        let total_shares = sub_amount(self.pools[pool.0 as usize].total_shares, amount)?;
        // Commit.
        if shares == 0 {
            self.users.remove(&key);
        } else {
            self.users.insert(key, UserState { shares, reward_debt });
        }
        self.pools[pool.0 as usize].total_shares = total_shares;
        Ok(settled)
    }

    /// Drops the whole position without settling. Pending reward is
    /// forfeited (it was never minted). Returns the share count.
    pub fn remove_all_shares_unsettled(
        &mut self,
        pool: PoolId,
        account: AccountId,
    ) -> Result<Amount> {
        self.pool(pool)?;
        let key = (pool.0, account);
        let prev = self.users.remove(&key).unwrap_or_default();
        let p = &mut self.pools[pool.0 as usize];
        p.total_shares = sub_amount(p.total_shares, prev.shares)?;
        Ok(prev.shares)
    }

    /// Per-pool share totals match the per-user positions.
    pub fn shares_consistent(&self) -> bool {
        let mut sums = vec![0u128; self.pools.len()];
        for ((pid, _), u) in &self.users {
            match sums.get_mut(*pid as usize) {
                Some(s) => *s = s.saturating_add(u.shares),
                None => return false,
            }
        }
        sums.iter()
            .zip(&self.pools)
            .all(|(s, p)| *s == p.total_shares)
    }

    pub fn total_shares(&self, pool: PoolId) -> Result<u128> {
        Ok(self.pool(pool)?.total_shares)
    }
}

fn reward_span(schedule: &RewardSchedule, from: u64, to: u64) -> u64 {
    let lo = from.max(schedule.start_block);
    let hi = to.min(schedule.end_block);
    hi.saturating_sub(lo)
}
