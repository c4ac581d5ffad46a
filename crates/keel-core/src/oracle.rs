use std::collections::BTreeMap;

use crate::math::{mul_div_floor, Ratio};
use crate::types::{Amount, PairId, WAD};
use crate::{KeelError, Result};

/// Source of the bonding curve's issuance price.
///
/// Governance-composed oracle stacks live behind this seam; the kernel only
/// ever reads a ratio. Sources must be infallible in steady state and report
/// errors (stale feed, invalid quote) instead of guessing.
pub trait PriceSource: std::fmt::Debug {
    fn latest_price(&self) -> Result<Ratio>;
}

/// Source of the stablecoin supply cap enforced on curve issuance.
pub trait SupplyCapSource: std::fmt::Debug {
    fn supply_cap(&self) -> Result<Amount>;
}

/// Constant price source (tests, drivers, and fixed-peg deployments).
#[derive(Clone, Debug)]
pub struct FixedPriceSource {
    price: Ratio,
}

impl FixedPriceSource {
    pub fn new(price: Ratio) -> Result<FixedPriceSource> {
        if price.numerator == 0 || price.denominator == 0 {
            return Err(KeelError::Config(
                "price numerator and denominator must be > 0".into(),
            ));
        }
        Ok(FixedPriceSource { price })
    }
}

impl PriceSource for FixedPriceSource {
    fn latest_price(&self) -> Result<Ratio> {
        Ok(self.price)
    }
}

/// Constant supply cap source.
#[derive(Clone, Debug)]
pub struct FixedSupplyCap {
    cap: Amount,
}

impl FixedSupplyCap {
    pub fn new(cap: Amount) -> FixedSupplyCap {
        FixedSupplyCap { cap }
    }
}

impl SupplyCapSource for FixedSupplyCap {
    fn supply_cap(&self) -> Result<Amount> {
        Ok(self.cap)
    }
}

#[derive(Clone, Copy, Debug)]
struct Observation {
    price0_cumulative: u128,
    price1_cumulative: u128,
    at: u64,
}

/// Time-weighted average price over AMM cumulative-price accumulators.
///
/// The first `update` for a pair only primes an observation; averages become
/// available after a second update at least `period` seconds later.
/// Accumulators wrap on overflow by design; differences stay correct as long
/// as observations are closer together than one full wrap.
#[derive(Clone, Debug)]
pub struct TwapOracle {
    period: u64,
    observations: BTreeMap<PairId, Observation>,
    /// WAD-scaled average prices `(token0 in token1, token1 in token0)`.
    averages: BTreeMap<PairId, (u128, u128)>,
}

impl TwapOracle {
    pub fn new(period: u64) -> Result<TwapOracle> {
        if period == 0 {
            return Err(KeelError::Config("twap period must be > 0".into()));
        }
        Ok(TwapOracle {
            period,
            observations: BTreeMap::new(),
            averages: BTreeMap::new(),
        })
    }

    /// Records cumulative-price accumulators for `pair`.
    ///
    /// Returns `Ok(true)` when averages were refreshed, `Ok(false)` when the
    /// call only primed the first observation or the period has not elapsed
    /// yet. Permissionless keepers may call this as often as they like.
    pub fn update(
        &mut self,
        pair: PairId,
        price0_cumulative: u128,
        price1_cumulative: u128,
        now: u64,
    ) -> Result<bool> {
        match self.observations.get(&pair) {
            None => {
                self.observations.insert(
                    pair,
                    Observation {
                        price0_cumulative,
                        price1_cumulative,
                        at: now,
                    },
                );
                Ok(false)
            }
            Some(obs) => {
                let elapsed = now.saturating_sub(obs.at);
                if elapsed < self.period {
                    return Ok(false);
                }
                let avg0 = price0_cumulative.wrapping_sub(obs.price0_cumulative)
                    / (elapsed as u128);
                let avg1 = price1_cumulative.wrapping_sub(obs.price1_cumulative)
                    / (elapsed as u128);
                self.averages.insert(pair, (avg0, avg1));
                self.observations.insert(
                    pair,
                    Observation {
                        price0_cumulative,
                        price1_cumulative,
                        at: now,
                    },
                );
                Ok(true)
            }
        }
    }

    pub fn has_price(&self, pair: PairId) -> bool {
        self.averages.contains_key(&pair)
    }

    /// Converts `amount_in` of one side into the other side's units at the
    /// recorded average price.
    ///
    /// `zero_for_one` selects the direction: `true` prices token0 in token1.
    pub fn consult(&self, pair: PairId, zero_for_one: bool, amount_in: Amount) -> Result<Amount> {
        let (avg0, avg1) = self
            .averages
            .get(&pair)
            .ok_or_else(|| KeelError::NotFound("no price observation for pair".into()))?;
        let avg = if zero_for_one { *avg0 } else { *avg1 };
        mul_div_floor(amount_in, avg, WAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenId;

    fn pair() -> PairId {
        PairId::derive(TokenId::Reserve, TokenId::Stable)
    }

    #[test]
    fn fixed_source_reports_its_ratio() {
        let src = FixedPriceSource::new(Ratio {
            numerator: 105_000_000,
            denominator: 100_000_000,
        })
        .unwrap();
        assert_eq!(src.latest_price().unwrap().numerator, 105_000_000);
        assert!(FixedPriceSource::new(Ratio {
            numerator: 0,
            denominator: 1
        })
        .is_err());
    }

    #[test]
    fn first_update_only_primes() {
        let mut twap = TwapOracle::new(100).unwrap();
        assert!(!twap.update(pair(), 0, 0, 0).unwrap());
        assert!(!twap.has_price(pair()));
        assert!(matches!(
            twap.consult(pair(), true, WAD),
            Err(KeelError::NotFound(_))
        ));
    }

    #[test]
    fn averages_require_a_full_period() {
        let mut twap = TwapOracle::new(100).unwrap();
        twap.update(pair(), 0, 0, 0).unwrap();
        assert!(!twap.update(pair(), 50 * WAD, 50 * WAD, 50).unwrap());
        assert!(!twap.has_price(pair()));
        // Constant price of 2 token1 per token0: accumulator grows 2*WAD/s.
        assert!(twap.update(pair(), 200 * WAD, 200 * WAD, 100).unwrap());
        assert_eq!(twap.consult(pair(), true, 10 * WAD).unwrap(), 20 * WAD);
    }

    #[test]
    fn consult_uses_the_selected_direction() {
        let mut twap = TwapOracle::new(10).unwrap();
        twap.update(pair(), 0, 0, 0).unwrap();
        // token0 worth 2 token1; token1 worth 0.5 token0.
        twap.update(pair(), 20 * WAD, 5 * WAD, 10).unwrap();
        assert_eq!(twap.consult(pair(), true, WAD).unwrap(), 2 * WAD);
        assert_eq!(twap.consult(pair(), false, WAD).unwrap(), WAD / 2);
    }
}
