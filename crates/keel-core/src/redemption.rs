//! Stablecoin-to-governance redemption.
//!
//! A fixed governance-per-stablecoin ratio minus a fee, same quoting order
//! as the bonding curve. The engine burns the stablecoin side, so redeeming
//! always shrinks stablecoin supply.

use crate::config::RedemptionParams;
use crate::math::{mul_div_floor, sub_amount, Ratio};
use crate::types::Amount;
use crate::{KeelError, Result};

#[derive(Clone, Debug)]
pub struct RedemptionUnit {
    ratio: Ratio,
    fee: Ratio,
}

impl RedemptionUnit {
    pub fn new(params: &RedemptionParams) -> Result<RedemptionUnit> {
        if params.ratio.numerator == 0 {
            return Err(KeelError::Config("redemption ratio must be > 0".into()));
        }
        params.fee.validate_fee()?;
        Ok(RedemptionUnit {
            ratio: params.ratio,
            fee: params.fee,
        })
    }

    pub fn ratio(&self) -> Ratio {
        self.ratio
    }

    pub fn fee(&self) -> Ratio {
        self.fee
    }

    /// Governance tokens paid for `amount_in` stablecoin: ratio first, fee
    /// second, flooring after each step.
    pub fn amount_out(&self, amount_in: Amount) -> Result<Amount> {
        let priced = mul_div_floor(amount_in, self.ratio.numerator, self.ratio.denominator)?;
        let keep = sub_amount(self.fee.denominator, self.fee.numerator)?;
        mul_div_floor(priced, keep, self.fee.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolParams;
    use crate::types::WAD;

    #[test]
    fn quotes_ratio_minus_fee() {
        let r = RedemptionUnit::new(&ProtocolParams::default().redemption).unwrap();
        // 100 stablecoin at 5:1 is 500, minus the 0.1% fee: 499.5.
        assert_eq!(r.amount_out(100 * WAD).unwrap(), 499_500_000_000_000_000_000);
        assert_eq!(r.amount_out(0).unwrap(), 0);
    }

    #[test]
    fn rejects_degenerate_params() {
        let mut p = ProtocolParams::default().redemption;
        p.ratio = Ratio::new(0, 1).unwrap();
        assert!(RedemptionUnit::new(&p).is_err());

        let mut p = ProtocolParams::default().redemption;
        p.fee = Ratio::new(10_000, 10_000).unwrap();
        assert!(RedemptionUnit::new(&p).is_err());
    }
}
