//! Epoch-bucketed linear vesting of farm rewards.
//!
//! Rewards settled in epoch `E` unlock in equal slices over epochs `E+1`
//! through `E+N`. Locks landing in the same epoch share one tranche, and
//! fully vested but unclaimed tranches are merged on the next lock, so an
//! account's live tranche count stays below `N + 2` no matter how long it
//! farms without claiming.

use std::collections::BTreeMap;

use crate::math::{add_amount, mul_div_floor, sub_amount};
use crate::types::{AccountId, Amount};
use crate::{KeelError, Result};

/// One vesting bucket: rewards locked in a single epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tranche {
    pub epoch: u64,
    pub total: Amount,
    pub released: Amount,
}

/// Per-account vesting state.
#[derive(Clone, Debug)]
pub struct VestingLedger {
    start_time: u64,
    epoch_length: u64,
    vesting_epochs: u64,
    max_tranches: usize,
    ledgers: BTreeMap<AccountId, Vec<Tranche>>,
}

impl VestingLedger {
    /// Preconditions:
    /// - `epoch_length > 0`, `vesting_epochs > 0`;
    /// - `max_tranches > vesting_epochs + 1`, so merging keeps every account
    ///   under the bound and locks never fail on a well-formed ledger.
    pub fn new(
        start_time: u64,
        epoch_length: u64,
        vesting_epochs: u64,
        max_tranches: usize,
    ) -> Result<VestingLedger> {
        if epoch_length == 0 {
            return Err(KeelError::Config("epoch length must be > 0".into()));
        }
        if vesting_epochs == 0 {
            return Err(KeelError::Config("vesting epochs must be > 0".into()));
        }
        if max_tranches as u64 <= vesting_epochs + 1 {
            return Err(KeelError::Config(
                "tranche bound must exceed vesting window".into(),
            ));
        }
        Ok(VestingLedger {
            start_time,
            epoch_length,
            vesting_epochs,
            max_tranches,
            ledgers: BTreeMap::new(),
        })
    }

    pub fn epoch_of(&self, now: u64) -> u64 {
        now.saturating_sub(self.start_time) / self.epoch_length
    }

    pub fn vesting_epochs(&self) -> u64 {
        self.vesting_epochs
    }

    /// Locks `amount` into the current epoch's tranche. Returns the epoch.
    pub fn lock(&mut self, account: AccountId, now: u64, amount: Amount) -> Result<u64> {
        let epoch = self.epoch_of(now);
        if amount == 0 {
            return Ok(epoch);
        }
        let n = self.vesting_epochs;
        let max = self.max_tranches;
        let entry = self.ledgers.entry(account).or_default();

        // Normalize: collapse fully vested tranches into one. Their entire
        // remainder is claimable regardless of epoch, so summing totals and
        // released amounts changes nothing observable.
        let mut vested_total: Amount = 0;
        let mut vested_released: Amount = 0;
        let mut live: Vec<Tranche> = Vec::with_capacity(entry.len() + 1);
        for t in entry.drain(..) {
            if epoch.saturating_sub(t.epoch) >= n {
                vested_total = add_amount(vested_total, t.total)?;
                vested_released = add_amount(vested_released, t.released)?;
            } else {
                live.push(t);
            }
        }
        if vested_total > 0 {
            live.push(Tranche {
                epoch: epoch.saturating_sub(n),
                total: vested_total,
                released: vested_released,
            });
        }
        *entry = live;

        let needs_new = !entry.iter().any(|t| t.epoch == epoch);
        if needs_new && entry.len() >= max {
            return Err(KeelError::Capacity("too many vesting tranches".into()));
        }
        if let Some(t) = entry.iter_mut().find(|t| t.epoch == epoch) {
            t.total = add_amount(t.total, amount)?;
        } else {
            entry.push(Tranche {
                epoch,
                total: amount,
                released: 0,
            });
        }
        Ok(epoch)
    }

    /// Outstanding balances: `(still locked, claimable now)`.
    pub fn amounts(&self, account: AccountId, now: u64) -> Result<(Amount, Amount)> {
        let epoch = self.epoch_of(now);
        let Some(entry) = self.ledgers.get(&account) else {
            return Ok((0, 0));
        };
        let mut locked: Amount = 0;
        let mut claimable: Amount = 0;
        for t in entry {
            let r = releasable(t, epoch, self.vesting_epochs)?;
            claimable = add_amount(claimable, r)?;
            let outstanding = sub_amount(t.total, t.released)?;
            locked = add_amount(locked, sub_amount(outstanding, r)?)?;
        }
        Ok((locked, claimable))
    }

    /// Releases everything claimable at `now` and prunes exhausted tranches.
    pub fn claim(&mut self, account: AccountId, now: u64) -> Result<Amount> {
        let epoch = self.epoch_of(now);
        let n = self.vesting_epochs;
        let Some(entry) = self.ledgers.get_mut(&account) else {
            return Ok(0);
        };
        let mut releases = Vec::with_capacity(entry.len());
        let mut total: Amount = 0;
        for t in entry.iter() {
            let r = releasable(t, epoch, n)?;
            releases.push(r);
            total = add_amount(total, r)?;
        }

        // Commit. `released + r` is the vested amount, bounded by the tranche
        // total, so plain addition cannot overflow.
        for (t, r) in entry.iter_mut().zip(&releases) {
            t.released += r;
        }
        entry.retain(|t| t.released < t.total);
        if entry.is_empty() {
            self.ledgers.remove(&account);
        }
        Ok(total)
    }

    pub fn tranche_count(&self, account: AccountId) -> usize {
        self.ledgers.get(&account).map_or(0, Vec::len)
    }

    /// Sum of unreleased rewards across all accounts. The vesting custody
    /// account must hold exactly this much of the reward token.
    pub fn total_outstanding(&self) -> Result<Amount> {
        let mut sum: Amount = 0;
        for entry in self.ledgers.values() {
            for t in entry {
                sum = add_amount(sum, sub_amount(t.total, t.released)?)?;
            }
        }
        Ok(sum)
    }

    pub fn max_tranches(&self) -> usize {
        self.max_tranches
    }
}

/// Vested-but-unreleased amount of one tranche at `current_epoch`.
///
/// Vesting is floored per tranche; the final epoch releases whatever
/// remainder the floors left behind, so the series always sums to `total`.
fn releasable(t: &Tranche, current_epoch: u64, vesting_epochs: u64) -> Result<Amount> {
    let elapsed = current_epoch.saturating_sub(t.epoch);
    let vested = if elapsed >= vesting_epochs {
        t.total
    } else {
        mul_div_floor(t.total, elapsed as u128, vesting_epochs as u128)?
    };
    sub_amount(vested, t.released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPOCH: u64 = 100;
    const N: u64 = 60;

    fn ledger() -> VestingLedger {
        VestingLedger::new(0, EPOCH, N, 4_096).unwrap()
    }

    fn alice() -> AccountId {
        AccountId::named("alice")
    }

    #[test]
    fn new_rejects_degenerate_bounds() {
        assert!(VestingLedger::new(0, 0, 60, 100).is_err());
        assert!(VestingLedger::new(0, 100, 0, 100).is_err());
        assert!(VestingLedger::new(0, 100, 60, 61).is_err());
        assert!(VestingLedger::new(0, 100, 60, 62).is_ok());
    }

    #[test]
    fn nothing_vests_inside_the_lock_epoch() {
        let mut v = ledger();
        v.lock(alice(), 0, 600).unwrap();
        assert_eq!(v.claim(alice(), 50).unwrap(), 0);
        let (locked, claimable) = v.amounts(alice(), 99).unwrap();
        assert_eq!((locked, claimable), (600, 0));
    }

    #[test]
    fn releases_one_slice_per_epoch() {
        let mut v = ledger();
        v.lock(alice(), 0, 600).unwrap();
        assert_eq!(v.claim(alice(), EPOCH).unwrap(), 10);
        // Same epoch again: nothing further.
        assert_eq!(v.claim(alice(), EPOCH + 50).unwrap(), 0);
        assert_eq!(v.claim(alice(), 2 * EPOCH).unwrap(), 10);
        // Skipping ahead releases the accumulated slices at once.
        assert_eq!(v.claim(alice(), 10 * EPOCH).unwrap(), 80);
        // Past the full window: the rest, then the ledger is pruned.
        assert_eq!(v.claim(alice(), (N + 5) * EPOCH).unwrap(), 500);
        assert_eq!(v.tranche_count(alice()), 0);
        assert_eq!(v.total_outstanding().unwrap(), 0);
    }

    #[test]
    fn floors_settle_on_the_final_epoch() {
        let mut v = ledger();
        v.lock(alice(), 0, 100).unwrap();
        // floor(100 * 1 / 60) = 1, floor(100 * 2 / 60) = 3.
        assert_eq!(v.claim(alice(), EPOCH).unwrap(), 1);
        assert_eq!(v.claim(alice(), 2 * EPOCH).unwrap(), 2);
        assert_eq!(v.claim(alice(), N * EPOCH).unwrap(), 97);
        assert_eq!(v.total_outstanding().unwrap(), 0);
    }

    #[test]
    fn same_epoch_locks_share_a_tranche() {
        let mut v = ledger();
        v.lock(alice(), 0, 100).unwrap();
        v.lock(alice(), 50, 200).unwrap();
        assert_eq!(v.tranche_count(alice()), 1);
        assert_eq!(v.claim(alice(), EPOCH).unwrap(), 5);
    }

    #[test]
    fn fully_vested_tranches_merge_on_lock() {
        let mut v = ledger();
        v.lock(alice(), 0, 100).unwrap();
        v.lock(alice(), EPOCH, 100).unwrap();
        // Both old tranches are fully vested by now; the new lock collapses
        // them into one merged tranche plus its own.
        v.lock(alice(), (N + 2) * EPOCH, 100).unwrap();
        assert_eq!(v.tranche_count(alice()), 2);
        let (_, claimable) = v.amounts(alice(), (N + 2) * EPOCH).unwrap();
        assert_eq!(claimable, 200);
    }

    #[test]
    fn partially_released_tranches_merge_without_double_pay() {
        let mut v = ledger();
        v.lock(alice(), 0, 600).unwrap();
        assert_eq!(v.claim(alice(), EPOCH).unwrap(), 10);
        v.lock(alice(), (N + 1) * EPOCH, 50).unwrap();
        assert_eq!(v.tranche_count(alice()), 2);
        // The merged tranche owes 590, not 600.
        assert_eq!(v.claim(alice(), (N + 1) * EPOCH).unwrap(), 590);
    }

    proptest! {
        #[test]
        fn claims_never_exceed_locks_and_finish_exact(
            amounts in proptest::collection::vec(1u128..1_000_000u128, 1..20),
        ) {
            let mut v = ledger();
            let mut locked_sum: u128 = 0;
            let mut claimed: u128 = 0;
            for (i, amount) in amounts.iter().enumerate() {
                let now = (i as u64) * EPOCH * 3;
                v.lock(alice(), now, *amount).unwrap();
                locked_sum += amount;
                claimed += v.claim(alice(), now).unwrap();
                prop_assert!(claimed <= locked_sum);
            }
            let horizon = (amounts.len() as u64 * 3 + N + 1) * EPOCH;
            claimed += v.claim(alice(), horizon).unwrap();
            prop_assert_eq!(claimed, locked_sum);
            prop_assert_eq!(v.total_outstanding().unwrap(), 0);
        }
    }
}
