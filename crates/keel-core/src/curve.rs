//! Bonding curve: oracle-priced stablecoin issuance.
//!
//! The curve holds no inventory of its own price; the engine feeds it the
//! oracle ratio at call time. Quotes floor at each step in a fixed order
//! (price first, then fee) so issuance never rounds in the buyer's favor.
//! Swept reserve is split across treasury deposits by basis-point weights,
//! with the division remainder routed to the last target so every sweep
//! conserves the input exactly.

use crate::config::CurveParams;
use crate::math::{add_amount, mul2_div2_floor, mul_div_floor, sub_amount, Ratio};
use crate::types::{Amount, Bps, DepositId, BPS_U16};
use crate::{KeelError, Result};

#[derive(Clone, Debug)]
pub struct BondingCurve {
    fee: Ratio,
    incentive_amount: Amount,
    incentive_interval: u64,
    last_incentive_at: u64,
    allocation_targets: Vec<(DepositId, Bps)>,
}

impl BondingCurve {
    /// The curve starts with everything allocated to `initial_target`.
    pub fn new(params: &CurveParams, now: u64, initial_target: DepositId) -> Result<BondingCurve> {
        params.fee.validate_fee()?;
        if params.incentive_interval == 0 {
            return Err(KeelError::Config("incentive interval must be > 0".into()));
        }
        Ok(BondingCurve {
            fee: params.fee,
            incentive_amount: params.incentive_amount,
            incentive_interval: params.incentive_interval,
            last_incentive_at: now,
            allocation_targets: vec![(initial_target, Bps::MAX)],
        })
    }

    pub fn fee(&self) -> Ratio {
        self.fee
    }

    /// Stablecoin issued for `amount_in` reserve at `price`.
    ///
    /// Floors after the price step, then again after the fee step; callers
    /// depend on this exact order.
    pub fn amount_out(&self, price: Ratio, amount_in: Amount) -> Result<Amount> {
        let priced = mul_div_floor(amount_in, price.numerator, price.denominator)?;
        let keep = sub_amount(self.fee.denominator, self.fee.numerator)?;
        mul_div_floor(priced, keep, self.fee.denominator)
    }

    /// Reserve needed to be issued at least `amount_out` stablecoin.
    ///
    /// Approximate inverse of [`Self::amount_out`]; the floors make an exact
    /// inverse impossible, but the round-trip error stays below ten base
    /// units.
    pub fn amount_in(&self, price: Ratio, amount_out: Amount) -> Result<Amount> {
        let keep = sub_amount(self.fee.denominator, self.fee.numerator)?;
        mul2_div2_floor(
            amount_out,
            price.denominator,
            self.fee.denominator,
            price.numerator,
            keep,
        )
    }

    pub fn allocation_targets(&self) -> &[(DepositId, Bps)] {
        &self.allocation_targets
    }

    /// Replaces the allocation targets.
    ///
    /// Preconditions:
    /// - at least one target, no duplicates, weights summing to exactly
    ///   10000 bps. Target existence is the caller's concern.
    pub fn set_allocation_targets(
        &mut self,
        targets: Vec<(DepositId, Bps)>,
        max_targets: usize,
    ) -> Result<()> {
        if targets.is_empty() {
            return Err(KeelError::InvalidInput("no allocation targets".into()));
        }
        if targets.len() > max_targets {
            return Err(KeelError::Capacity("too many allocation targets".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        let mut sum: u64 = 0;
        for (id, weight) in &targets {
            if !seen.insert(*id) {
                return Err(KeelError::InvalidInput(format!(
                    "duplicate allocation target {}",
                    id.0
                )));
            }
            sum += weight.as_u64();
        }
        if sum != u64::from(BPS_U16) {
            return Err(KeelError::InvalidInput(format!(
                "allocation weights must sum to {BPS_U16}, got {sum}"
            )));
        }
        self.allocation_targets = targets;
        Ok(())
    }

    /// Splits `total` across the targets by weight. The sum of the returned
    /// shares always equals `total`.
    pub fn split_allocation(&self, total: Amount) -> Result<Vec<(DepositId, Amount)>> {
        let mut out = Vec::with_capacity(self.allocation_targets.len());
        let mut assigned: Amount = 0;
        for (i, (id, weight)) in self.allocation_targets.iter().enumerate() {
            let share = if i + 1 == self.allocation_targets.len() {
                sub_amount(total, assigned)?
            } else {
                mul_div_floor(total, weight.as_u128(), u128::from(BPS_U16))?
            };
            assigned = add_amount(assigned, share)?;
            out.push((*id, share));
        }
        Ok(out)
    }

    pub fn incentive_amount(&self) -> Amount {
        self.incentive_amount
    }

    pub fn incentive_due(&self, now: u64) -> bool {
        now.saturating_sub(self.last_incentive_at) >= self.incentive_interval
    }

    /// Claims the keeper incentive if the cooldown has elapsed.
    pub fn take_incentive(&mut self, now: u64) -> Option<Amount> {
        if self.incentive_due(now) {
            self.last_incentive_at = now;
            Some(self.incentive_amount)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolParams;
    use crate::types::WAD;
    use proptest::prelude::*;

    fn curve() -> BondingCurve {
        BondingCurve::new(&ProtocolParams::default().curve, 0, DepositId(0)).unwrap()
    }

    fn price() -> Ratio {
        ProtocolParams::default().curve.price
    }

    #[test]
    fn amount_out_prices_then_fees() {
        let c = curve();
        // 10000 in at 1.05 is 10500, minus the 0.1% fee: 10489.5.
        assert_eq!(
            c.amount_out(price(), 10_000 * WAD).unwrap(),
            10_489_500_000_000_000_000_000
        );
        assert_eq!(c.amount_out(price(), 0).unwrap(), 0);
    }

    #[test]
    fn amount_in_inverts_the_example() {
        let c = curve();
        let out = c.amount_out(price(), 10_000 * WAD).unwrap();
        assert_eq!(c.amount_in(price(), out).unwrap(), 10_000 * WAD);
    }

    #[test]
    fn full_fee_is_rejected() {
        let mut params = ProtocolParams::default().curve;
        params.fee = Ratio::new(10_000, 10_000).unwrap();
        assert!(BondingCurve::new(&params, 0, DepositId(0)).is_err());
    }

    #[test]
    fn target_validation() {
        let mut c = curve();
        assert!(matches!(
            c.set_allocation_targets(vec![], 16),
            Err(KeelError::InvalidInput(_))
        ));
        assert!(matches!(
            c.set_allocation_targets(
                vec![
                    (DepositId(0), Bps::new(5_000).unwrap()),
                    (DepositId(0), Bps::new(5_000).unwrap()),
                ],
                16
            ),
            Err(KeelError::InvalidInput(_))
        ));
        assert!(matches!(
            c.set_allocation_targets(
                vec![
                    (DepositId(0), Bps::new(5_000).unwrap()),
                    (DepositId(1), Bps::new(4_000).unwrap()),
                ],
                16
            ),
            Err(KeelError::InvalidInput(_))
        ));
        assert!(matches!(
            c.set_allocation_targets(
                vec![
                    (DepositId(0), Bps::new(5_000).unwrap()),
                    (DepositId(1), Bps::new(5_000).unwrap()),
                ],
                1
            ),
            Err(KeelError::Capacity(_))
        ));
        c.set_allocation_targets(
            vec![
                (DepositId(0), Bps::new(7_000).unwrap()),
                (DepositId(1), Bps::new(3_000).unwrap()),
            ],
            16,
        )
        .unwrap();
        assert_eq!(c.allocation_targets().len(), 2);
    }

    #[test]
    fn split_conserves_with_remainder_to_last() {
        let mut c = curve();
        c.set_allocation_targets(
            vec![
                (DepositId(0), Bps::new(3_333).unwrap()),
                (DepositId(1), Bps::new(3_333).unwrap()),
                (DepositId(2), Bps::new(3_334).unwrap()),
            ],
            16,
        )
        .unwrap();
        let shares = c.split_allocation(1_000_000_000_000_000_001).unwrap();
        let sum: u128 = shares.iter().map(|(_, s)| s).sum();
        assert_eq!(sum, 1_000_000_000_000_000_001);
        // Floors shorted the first two; the last absorbs the dust.
        assert_eq!(shares[0].1, 333_300_000_000_000_000);
        assert_eq!(shares[1].1, 333_300_000_000_000_000);
        assert_eq!(shares[2].1, 333_400_000_000_000_001);
    }

    #[test]
    fn incentive_respects_the_cooldown() {
        let mut params = ProtocolParams::default().curve;
        params.incentive_interval = 100;
        let mut c = BondingCurve::new(&params, 0, DepositId(0)).unwrap();
        assert!(!c.incentive_due(50));
        assert_eq!(c.take_incentive(50), None);
        assert_eq!(c.take_incentive(100), Some(params.incentive_amount));
        // Cooldown restarts from the claim.
        assert_eq!(c.take_incentive(150), None);
        assert_eq!(c.take_incentive(200), Some(params.incentive_amount));
    }

    proptest! {
        #[test]
        fn round_trip_error_stays_below_ten_units(x in 0u128..1_000_000_000_000_000_000_000_000_000u128) {
            let c = curve();
            let out = c.amount_out(price(), x).unwrap();
            let back = c.amount_in(price(), out).unwrap();
            prop_assert!(back <= x);
            prop_assert!(x - back < 10);
        }

        #[test]
        fn split_always_conserves(total in 0u128..u128::MAX / 2) {
            let c = curve();
            let shares = c.split_allocation(total).unwrap();
            let sum: u128 = shares.iter().map(|(_, s)| s).sum();
            prop_assert_eq!(sum, total);
        }
    }
}
