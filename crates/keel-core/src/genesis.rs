//! Genesis auction.
//!
//! A time-boxed window collects reserve commitments. At launch the effective
//! total (capped at the subscription cap) is priced through the bonding curve
//! in one shot, and every committer later redeems a pro-rata share of the
//! minted stablecoin, the governance allocation, and any oversubscription
//! refund. Committers stuck in an unlaunched auction can pull their funds
//! back out once the emergency exit window opens.
//!
//! Post-launch the commitment table is frozen as the denominator for
//! redemption, so redeeming never changes anyone else's share.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::GenesisParams;
use crate::curve::BondingCurve;
use crate::math::{add_amount, mul_div_floor, sub_amount, Ratio};
use crate::types::{AccountId, Amount};
use crate::{KeelError, Result};

/// What one committer is owed after launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedemptionAmounts {
    pub stable: Amount,
    pub governance: Amount,
    pub refund: Amount,
}

/// Preview of what a commitment would redeem for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenesisQuote {
    pub stable: Amount,
    pub governance: Amount,
}

#[derive(Clone, Debug)]
pub struct GenesisAuction {
    duration: u64,
    exit_window_delay: u64,
    cap: Amount,
    governance_allocation: Amount,
    start: Option<u64>,
    commitments: BTreeMap<AccountId, Amount>,
    /// `(owner, operator)` pairs allowed to trigger the owner's exit.
    exit_approvals: BTreeSet<(AccountId, AccountId)>,
    total_committed: Amount,
    launched: bool,
    total_effective: Amount,
    minted_stable: Amount,
    minted_governance: Amount,
    refunds_paid: Amount,
    stable_paid: Amount,
    governance_paid: Amount,
}

impl GenesisAuction {
    pub fn new(params: &GenesisParams) -> GenesisAuction {
        GenesisAuction {
            duration: params.duration,
            exit_window_delay: params.exit_window_delay,
            cap: params.cap,
            governance_allocation: params.governance_allocation,
            start: None,
            commitments: BTreeMap::new(),
            exit_approvals: BTreeSet::new(),
            total_committed: 0,
            launched: false,
            total_effective: 0,
            minted_stable: 0,
            minted_governance: 0,
            refunds_paid: 0,
            stable_paid: 0,
            governance_paid: 0,
        }
    }

    /// Opens the commitment window at `now`.
    pub fn initialize(&mut self, now: u64) -> Result<()> {
        if self.start.is_some() {
            return Err(KeelError::AlreadyDone("genesis already initialized".into()));
        }
        self.start = Some(now);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.start.is_some()
    }

    pub fn start(&self) -> Option<u64> {
        self.start
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn cap(&self) -> Amount {
        self.cap
    }

    pub fn governance_allocation(&self) -> Amount {
        self.governance_allocation
    }

    pub fn is_open(&self, now: u64) -> bool {
        match self.start {
            Some(start) => now >= start && now < start.saturating_add(self.duration),
            None => false,
        }
    }

    pub fn ensure_open(&self, now: u64) -> Result<()> {
        let Some(start) = self.start else {
            return Err(KeelError::Timing("genesis not started".into()));
        };
        if now < start {
            return Err(KeelError::Timing("genesis not started".into()));
        }
        if now >= start.saturating_add(self.duration) {
            return Err(KeelError::Timing("genesis ended".into()));
        }
        Ok(())
    }

    pub fn ensure_ended(&self, now: u64) -> Result<()> {
        let Some(start) = self.start else {
            return Err(KeelError::Timing("genesis not started".into()));
        };
        if now < start.saturating_add(self.duration) {
            return Err(KeelError::Timing("genesis not ended".into()));
        }
        Ok(())
    }

    /// Records a commitment for `beneficiary`.
    pub fn commit(
        &mut self,
        beneficiary: AccountId,
        amount: Amount,
        now: u64,
        max_committers: usize,
    ) -> Result<()> {
        self.ensure_open(now)?;
        if amount == 0 {
            return Err(KeelError::InvalidInput("no value sent".into()));
        }
        let existing = self.commitments.get(&beneficiary).copied();
        if existing.is_none() && self.commitments.len() >= max_committers {
            return Err(KeelError::Capacity("too many committers".into()));
        }
        let balance = add_amount(existing.unwrap_or(0), amount)?;
        let total = add_amount(self.total_committed, amount)?;
        // Commit.
        self.commitments.insert(beneficiary, balance);
        self.total_committed = total;
        Ok(())
    }

    pub fn committed(&self, account: AccountId) -> Amount {
        self.commitments.get(&account).copied().unwrap_or(0)
    }

    pub fn committer_count(&self) -> usize {
        self.commitments.len()
    }

    pub fn total_committed(&self) -> Amount {
        self.total_committed
    }

    pub fn set_exit_approval(&mut self, owner: AccountId, operator: AccountId, approved: bool) {
        if approved {
            self.exit_approvals.insert((owner, operator));
        } else {
            self.exit_approvals.remove(&(owner, operator));
        }
    }

    pub fn exit_allowed(&self, caller: AccountId, owner: AccountId) -> bool {
        caller == owner || self.exit_approvals.contains(&(owner, caller))
    }

    /// The emergency exit is open only for a stuck auction: after the delay
    /// has passed and before any launch.
    pub fn ensure_exit_window(&self, now: u64) -> Result<()> {
        if self.launched {
            return Err(KeelError::AlreadyDone("launch already happened".into()));
        }
        let Some(start) = self.start else {
            return Err(KeelError::Phase("still in genesis period".into()));
        };
        if now < start.saturating_add(self.exit_window_delay) {
            return Err(KeelError::Phase("still in genesis period".into()));
        }
        Ok(())
    }

    /// Removes and returns `owner`'s commitment for an emergency exit.
    pub fn take_exit(&mut self, owner: AccountId) -> Result<Amount> {
        let amount = self.committed(owner);
        if amount == 0 {
            return Err(KeelError::InsufficientFunds("no committed balance".into()));
        }
        let total = sub_amount(self.total_committed, amount)?;
        // Commit.
        self.commitments.remove(&owner);
        self.total_committed = total;
        Ok(amount)
    }

    /// Freezes the auction with the launch outcome.
    pub fn mark_launched(
        &mut self,
        total_effective: Amount,
        minted_stable: Amount,
        minted_governance: Amount,
    ) -> Result<()> {
        if self.launched {
            return Err(KeelError::AlreadyDone("launch already happened".into()));
        }
        self.launched = true;
        self.total_effective = total_effective;
        self.minted_stable = minted_stable;
        self.minted_governance = minted_governance;
        Ok(())
    }

    pub fn launched(&self) -> bool {
        self.launched
    }

    pub fn total_effective(&self) -> Amount {
        self.total_effective
    }

    pub fn minted_stable(&self) -> Amount {
        self.minted_stable
    }

    pub fn minted_governance(&self) -> Amount {
        self.minted_governance
    }

    pub fn refunds_paid(&self) -> Amount {
        self.refunds_paid
    }

    pub fn stable_paid(&self) -> Amount {
        self.stable_paid
    }

    pub fn governance_paid(&self) -> Amount {
        self.governance_paid
    }

    /// Post-launch redemption entitlement for `account`. Zero commitment is
    /// not an error here; the view reports zeros.
    pub fn amounts_to_redeem(&self, account: AccountId) -> Result<RedemptionAmounts> {
        if !self.launched {
            return Err(KeelError::Phase("still in genesis period".into()));
        }
        let commitment = self.committed(account);
        if commitment == 0 {
            return Ok(RedemptionAmounts {
                stable: 0,
                governance: 0,
                refund: 0,
            });
        }
        self.redemption_for(commitment)
    }

    /// Validates `account`'s redemption and returns what it pays, without
    /// touching any state.
    pub fn redeem_due(&self, account: AccountId) -> Result<RedemptionAmounts> {
        if !self.launched {
            return Err(KeelError::Phase("still in genesis period".into()));
        }
        let commitment = self.committed(account);
        if commitment == 0 {
            return Err(KeelError::InsufficientFunds("no committed balance".into()));
        }
        self.redemption_for(commitment)
    }

    /// Records `out` as paid and clears the commitment. Callers settle only
    /// after the transfers quoted by [`GenesisAuction::redeem_due`] have gone
    /// through, so a failed payout never destroys the commitment.
    pub fn settle_redeem(&mut self, account: AccountId, out: RedemptionAmounts) -> Result<()> {
        let stable_paid = add_amount(self.stable_paid, out.stable)?;
        let governance_paid = add_amount(self.governance_paid, out.governance)?;
        let refunds_paid = add_amount(self.refunds_paid, out.refund)?;
        // Commit.
        self.commitments.remove(&account);
        self.stable_paid = stable_paid;
        self.governance_paid = governance_paid;
        self.refunds_paid = refunds_paid;
        Ok(())
    }

    /// Consumes `account`'s commitment and returns what it redeems for.
    pub fn take_redeem(&mut self, account: AccountId) -> Result<RedemptionAmounts> {
        let out = self.redeem_due(account)?;
        self.settle_redeem(account, out)?;
        Ok(out)
    }

    /// Stablecoin and governance amounts a commitment of `amount_in` buys.
    ///
    /// `inclusive` prices a commitment already inside the pool (the total is
    /// unchanged); otherwise the amount is added on top first. Quotes that
    /// cannot fit are rejected rather than silently clipped.
    pub fn quote(
        &self,
        amount_in: Amount,
        inclusive: bool,
        curve: &BondingCurve,
        price: Ratio,
    ) -> Result<GenesisQuote> {
        let total_in = if inclusive {
            if amount_in > self.total_committed {
                return Err(KeelError::Capacity("not enough supply".into()));
            }
            self.total_committed
        } else {
            let total = add_amount(self.total_committed, amount_in)?;
            if total > self.cap {
                return Err(KeelError::Capacity("not enough supply".into()));
            }
            total
        };
        if amount_in == 0 || total_in == 0 {
            return Ok(GenesisQuote {
                stable: 0,
                governance: 0,
            });
        }
        let effective = total_in.min(self.cap);
        let stable_total = curve.amount_out(price, effective)?;
        Ok(GenesisQuote {
            stable: mul_div_floor(stable_total, amount_in, total_in)?,
            governance: mul_div_floor(self.governance_allocation, amount_in, total_in)?,
        })
    }

    /// Reserve the launch actually spends. Undersubscribed auctions spend
    /// the whole committed total. Oversubscribed ones spend the sum of the
    /// per-account effective commitments, not the cap: each refund rounds up
    /// to `c - floor(c * cap / total)`, so the auction must keep the
    /// complementary dust behind or the last refund bounces.
    pub fn launch_spend(&self) -> Result<Amount> {
        if self.total_committed <= self.cap {
            return Ok(self.total_committed);
        }
        let mut spend = 0u128;
        for &commitment in self.commitments.values() {
            let effective = mul_div_floor(commitment, self.cap, self.total_committed)?;
            spend = add_amount(spend, effective)?;
        }
        Ok(spend)
    }

    fn redemption_for(&self, commitment: Amount) -> Result<RedemptionAmounts> {
        let total = self.total_committed;
        let stable = mul_div_floor(self.minted_stable, commitment, total)?;
        let governance = mul_div_floor(self.minted_governance, commitment, total)?;
        let refund = if total > self.cap {
            let effective = mul_div_floor(commitment, self.cap, total)?;
            sub_amount(commitment, effective)?
        } else {
            0
        };
        Ok(RedemptionAmounts {
            stable,
            governance,
            refund,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolParams;
    use crate::types::{DepositId, WAD};
    use proptest::prelude::*;

    fn params() -> GenesisParams {
        GenesisParams {
            duration: 1_000,
            exit_window_delay: 2_000,
            cap: 150 * WAD,
            governance_allocation: 1_000 * WAD,
        }
    }

    fn alice() -> AccountId {
        AccountId::named("alice")
    }

    fn bob() -> AccountId {
        AccountId::named("bob")
    }

    #[test]
    fn window_gates_commitments() {
        let mut g = GenesisAuction::new(&params());
        assert!(matches!(
            g.commit(alice(), WAD, 0, 100),
            Err(KeelError::Timing(_))
        ));
        g.initialize(10).unwrap();
        assert!(matches!(
            g.initialize(10),
            Err(KeelError::AlreadyDone(_))
        ));
        g.commit(alice(), WAD, 10, 100).unwrap();
        g.commit(alice(), WAD, 500, 100).unwrap();
        assert_eq!(g.committed(alice()), 2 * WAD);
        assert!(matches!(
            g.commit(alice(), WAD, 1_010, 100),
            Err(KeelError::Timing(_))
        ));
        assert!(matches!(
            g.commit(alice(), 0, 500, 100),
            Err(KeelError::InvalidInput(_))
        ));
    }

    #[test]
    fn committer_capacity_is_bounded() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), WAD, 1, 1).unwrap();
        // Existing committers may top up; new ones are refused.
        g.commit(alice(), WAD, 2, 1).unwrap();
        assert!(matches!(
            g.commit(bob(), WAD, 3, 1),
            Err(KeelError::Capacity(_))
        ));
    }

    #[test]
    fn exit_window_opens_after_the_delay() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), 5 * WAD, 1, 100).unwrap();
        assert!(matches!(
            g.ensure_exit_window(1_999),
            Err(KeelError::Phase(_))
        ));
        g.ensure_exit_window(2_000).unwrap();
        assert_eq!(g.take_exit(alice()).unwrap(), 5 * WAD);
        assert_eq!(g.total_committed(), 0);
        assert!(matches!(
            g.take_exit(alice()),
            Err(KeelError::InsufficientFunds(_))
        ));
    }

    #[test]
    fn exit_window_closes_at_launch() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), 5 * WAD, 1, 100).unwrap();
        g.mark_launched(5 * WAD, 5 * WAD, 1_000 * WAD).unwrap();
        assert!(matches!(
            g.ensure_exit_window(10_000),
            Err(KeelError::AlreadyDone(_))
        ));
    }

    #[test]
    fn exit_approvals_delegate() {
        let mut g = GenesisAuction::new(&params());
        assert!(g.exit_allowed(alice(), alice()));
        assert!(!g.exit_allowed(bob(), alice()));
        g.set_exit_approval(alice(), bob(), true);
        assert!(g.exit_allowed(bob(), alice()));
        g.set_exit_approval(alice(), bob(), false);
        assert!(!g.exit_allowed(bob(), alice()));
    }

    #[test]
    fn oversubscription_redeems_pro_rata_with_refunds() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), 30 * WAD, 1, 100).unwrap();
        g.commit(bob(), 120 * WAD, 2, 100).unwrap();
        // Launch priced the capped 150 into 105 stablecoin.
        g.mark_launched(150 * WAD, 105 * WAD, 1_000 * WAD).unwrap();

        let a = g.take_redeem(alice()).unwrap();
        assert_eq!(a.stable, 21 * WAD);
        assert_eq!(a.governance, 200 * WAD);
        assert_eq!(a.refund, 0);

        let b = g.take_redeem(bob()).unwrap();
        assert_eq!(b.stable, 84 * WAD);
        assert_eq!(b.governance, 800 * WAD);
        assert_eq!(b.refund, 0);

        assert_eq!(g.stable_paid(), 105 * WAD);
        assert_eq!(g.governance_paid(), 1_000 * WAD);
        assert!(matches!(
            g.take_redeem(alice()),
            Err(KeelError::InsufficientFunds(_))
        ));
    }

    #[test]
    fn refunds_cover_exactly_the_excess() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), 60 * WAD, 1, 100).unwrap();
        g.commit(bob(), 140 * WAD, 2, 100).unwrap();
        // 200 committed against a 150 cap.
        g.mark_launched(150 * WAD, 105 * WAD, 1_000 * WAD).unwrap();

        let a = g.amounts_to_redeem(alice()).unwrap();
        let b = g.amounts_to_redeem(bob()).unwrap();
        assert_eq!(a.refund, 60 * WAD - 45 * WAD);
        assert_eq!(b.refund, 140 * WAD - 105 * WAD);
        assert_eq!(a.refund + b.refund, 50 * WAD);
        // Stablecoin still splits over the full committed total.
        assert_eq!(a.stable + b.stable, 105 * WAD);
    }

    #[test]
    fn launch_spend_leaves_exactly_the_refunds_behind() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        // Cap + 1 base unit committed, split so neither share divides evenly.
        g.commit(alice(), 7, 1, 100).unwrap();
        g.commit(bob(), 150 * WAD + 1 - 7, 2, 100).unwrap();

        // Each refund rounds up a base unit, so the spend stops short of
        // the cap by the same dust.
        let spend = g.launch_spend().unwrap();
        assert_eq!(spend, 150 * WAD - 1);
        g.mark_launched(spend, 105 * WAD, 1_000 * WAD).unwrap();

        let a = g.take_redeem(alice()).unwrap();
        let b = g.take_redeem(bob()).unwrap();
        assert_eq!(a.refund, 1);
        assert_eq!(b.refund, 1);
        assert_eq!(a.refund + b.refund, g.total_committed() - spend);
    }

    #[test]
    fn settle_happens_apart_from_the_quote() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), 100 * WAD, 1, 100).unwrap();
        g.mark_launched(100 * WAD, 105 * WAD, 1_000 * WAD).unwrap();

        // The quote leaves the commitment alone until it is settled.
        let due = g.redeem_due(alice()).unwrap();
        assert_eq!(g.committed(alice()), 100 * WAD);
        g.settle_redeem(alice(), due).unwrap();
        assert_eq!(g.committed(alice()), 0);
        assert_eq!(g.stable_paid(), due.stable);
        assert!(matches!(
            g.redeem_due(alice()),
            Err(KeelError::InsufficientFunds(_))
        ));
    }

    #[test]
    fn redeem_requires_launch() {
        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), WAD, 1, 100).unwrap();
        assert!(matches!(
            g.take_redeem(alice()),
            Err(KeelError::Phase(_))
        ));
        assert!(matches!(
            g.amounts_to_redeem(alice()),
            Err(KeelError::Phase(_))
        ));
    }

    #[test]
    fn quotes_follow_the_curve_price() {
        let pp = ProtocolParams::default();
        let curve = BondingCurve::new(&pp.curve, 0, DepositId(0)).unwrap();
        let price = pp.curve.price;

        let mut g = GenesisAuction::new(&params());
        g.initialize(0).unwrap();
        g.commit(alice(), 100 * WAD, 1, 100).unwrap();

        // Inclusive: alice asks what her whole commitment is worth.
        let q = g.quote(100 * WAD, true, &curve, price).unwrap();
        assert_eq!(q.stable, curve.amount_out(price, 100 * WAD).unwrap());
        assert_eq!(q.governance, 1_000 * WAD);

        // Adding 40 more dilutes governance pro-rata.
        let q = g.quote(40 * WAD, false, &curve, price).unwrap();
        let total_stable = curve.amount_out(price, 140 * WAD).unwrap();
        assert_eq!(q.stable, mul_div_floor(total_stable, 40 * WAD, 140 * WAD).unwrap());
        assert_eq!(q.governance, mul_div_floor(1_000 * WAD, 40 * WAD, 140 * WAD).unwrap());

        // Past the cap there is nothing left to quote.
        assert!(matches!(
            g.quote(60 * WAD, false, &curve, price),
            Err(KeelError::Capacity(_))
        ));
        assert!(matches!(
            g.quote(101 * WAD, true, &curve, price),
            Err(KeelError::Capacity(_))
        ));
    }

    proptest! {
        #[test]
        fn full_redemption_conserves_launch_totals(
            amounts in proptest::collection::vec(1u128..10_000u128, 1..12),
            cap_scale in 1u128..20u128,
        ) {
            let mut p = params();
            p.cap = cap_scale * 10 * WAD;
            let pp = ProtocolParams::default();
            let curve = BondingCurve::new(&pp.curve, 0, DepositId(0)).unwrap();

            let mut g = GenesisAuction::new(&p);
            g.initialize(0).unwrap();
            let committers: Vec<AccountId> = (0..amounts.len())
                .map(|i| AccountId::named(&format!("committer-{i}")))
                .collect();
            for (who, amount) in committers.iter().zip(&amounts) {
                g.commit(*who, amount * WAD, 1, 100).unwrap();
            }
            let total = g.total_committed();
            let effective = g.launch_spend().unwrap();
            let stable_minted = curve.amount_out(pp.curve.price, effective).unwrap();
            g.mark_launched(effective, stable_minted, p.governance_allocation)
                .unwrap();

            let mut stable_sum = 0u128;
            let mut governance_sum = 0u128;
            let mut refund_sum = 0u128;
            for who in &committers {
                let out = g.take_redeem(*who).unwrap();
                stable_sum += out.stable;
                governance_sum += out.governance;
                refund_sum += out.refund;
            }

            // Per-account floors lose strictly less than one base unit each.
            let n = committers.len() as u128;
            prop_assert!(stable_sum <= stable_minted);
            prop_assert!(stable_minted - stable_sum < n);
            prop_assert!(governance_sum <= p.governance_allocation);
            prop_assert!(p.governance_allocation - governance_sum < n);
            // The reserve left unspent at launch covers every refund exactly.
            prop_assert_eq!(refund_sum, total - effective);
            prop_assert!(effective >= p.cap.min(total).saturating_sub(n));
            prop_assert_eq!(g.committer_count(), 0);
            prop_assert_eq!(g.stable_paid(), stable_sum);
            prop_assert_eq!(g.governance_paid(), governance_sum);
            prop_assert_eq!(g.refunds_paid(), refund_sum);
        }
    }
}
