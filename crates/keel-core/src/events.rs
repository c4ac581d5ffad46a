//! Append-only, hash-chained event log.
//!
//! Every state-mutating operation appends one event. Each record commits to
//! its predecessor's hash, so any attempt to rewrite history breaks the chain
//! and `verify` reports the first damaged sequence number. Drivers replay the
//! log or dump it as JSON for audit.

use serde::{Deserialize, Serialize};

use crate::core::{Component, Role};
use crate::hash::sha256;
use crate::types::{AccountId, Amount, DepositId, FarmKind, PairId, PoolId, TokenId};
use crate::{Hash32, KeelError, Result};

const EVENT_RECORD_DOMAIN_V1: &[u8] = b"KEEL_EVENT_RECORD_V1";

/// Protocol event payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    GenesisInitialized {
        start: u64,
        duration: u64,
    },
    GenesisPurchase {
        from: AccountId,
        beneficiary: AccountId,
        amount: Amount,
    },
    ExitApprovalSet {
        owner: AccountId,
        operator: AccountId,
        approved: bool,
    },
    GenesisExit {
        account: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Launched {
        total_effective: Amount,
        stable_minted: Amount,
        governance_allocation: Amount,
        liquidity: Amount,
    },
    GenesisRedeem {
        account: AccountId,
        stable: Amount,
        governance: Amount,
        refund: Amount,
    },
    CurvePurchase {
        to: AccountId,
        amount_in: Amount,
        amount_out: Amount,
    },
    Allocated {
        caller: AccountId,
        total: Amount,
        incentive: Amount,
    },
    PairCreated {
        pair: PairId,
        token0: TokenId,
        token1: TokenId,
    },
    LiquidityAdded {
        pair: PairId,
        provider: AccountId,
        amount0: Amount,
        amount1: Amount,
        liquidity: Amount,
    },
    LiquidityRemoved {
        pair: PairId,
        provider: AccountId,
        liquidity: Amount,
        amount0: Amount,
        amount1: Amount,
    },
    Swapped {
        pair: PairId,
        account: AccountId,
        token_in: TokenId,
        amount_in: Amount,
        amount_out: Amount,
    },
    SwapVolume {
        pool: PoolId,
        account: AccountId,
        quantity: Amount,
    },
    FarmPoolAdded {
        kind: FarmKind,
        pool: PoolId,
    },
    FarmDeposit {
        kind: FarmKind,
        pool: PoolId,
        account: AccountId,
        amount: Amount,
    },
    FarmWithdraw {
        kind: FarmKind,
        pool: PoolId,
        account: AccountId,
        amount: Amount,
    },
    FarmEmergencyWithdraw {
        pool: PoolId,
        account: AccountId,
        amount: Amount,
    },
    RewardLocked {
        account: AccountId,
        epoch: u64,
        amount: Amount,
    },
    Claimed {
        account: AccountId,
        amount: Amount,
    },
    PcvDeposited {
        deposit: DepositId,
        amount: Amount,
        stable_minted: Amount,
        liquidity: Amount,
    },
    PcvWithdrawn {
        deposit: DepositId,
        to: AccountId,
        amount: Amount,
    },
    PcvLiquidityRemoved {
        deposit: DepositId,
        liquidity: Amount,
        reserve_out: Amount,
        stable_burned: Amount,
    },
    Harvested {
        deposit: DepositId,
        amount: Amount,
    },
    RedeemPurchase {
        to: AccountId,
        amount_in: Amount,
        amount_out: Amount,
    },
    OracleUpdated {
        pair: PairId,
    },
    ComponentPaused {
        component: Component,
    },
    ComponentUnpaused {
        component: Component,
    },
    RoleGranted {
        role: Role,
        account: AccountId,
    },
    RoleRevoked {
        role: Role,
        account: AccountId,
    },
    DepositAdded {
        deposit: DepositId,
    },
    Minted {
        token: TokenId,
        to: AccountId,
        amount: Amount,
    },
    ParamsUpdated {
        what: String,
    },
}

/// One chained log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub block: u64,
    pub timestamp: u64,
    pub prev_hash: Hash32,
    pub hash: Hash32,
    pub event: Event,
}

/// The chained log itself.
#[derive(Clone, Debug)]
pub struct EventLog {
    records: Vec<EventRecord>,
    last_hash: Hash32,
}

impl Default for EventLog {
    fn default() -> EventLog {
        EventLog::new()
    }
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog {
            records: Vec::new(),
            last_hash: Hash32::ZERO,
        }
    }

    /// Appends an event at the given clock position.
    ///
    /// Postconditions:
    /// - the new record's `prev_hash` equals the previous `last_hash`;
    /// - `last_hash` commits to the full log contents.
    pub fn append(&mut self, block: u64, timestamp: u64, event: Event) -> Result<()> {
        let seq = self.records.len() as u64;
        let hash = record_hash(seq, block, timestamp, &self.last_hash, &event)?;
        self.records.push(EventRecord {
            seq,
            block,
            timestamp,
            prev_hash: self.last_hash,
            hash,
            event,
        });
        self.last_hash = hash;
        Ok(())
    }

    /// Recomputes the whole chain and checks every link.
    pub fn verify(&self) -> Result<()> {
        let mut prev = Hash32::ZERO;
        for (i, rec) in self.records.iter().enumerate() {
            if rec.seq != i as u64 {
                return Err(KeelError::Internal(format!(
                    "event chain broken at seq {i}: sequence mismatch"
                )));
            }
            if rec.prev_hash != prev {
                return Err(KeelError::Internal(format!(
                    "event chain broken at seq {i}: prev hash mismatch"
                )));
            }
            let expect = record_hash(rec.seq, rec.block, rec.timestamp, &rec.prev_hash, &rec.event)?;
            if rec.hash != expect {
                return Err(KeelError::Internal(format!(
                    "event chain broken at seq {i}: record hash mismatch"
                )));
            }
            prev = rec.hash;
        }
        if prev != self.last_hash {
            return Err(KeelError::Internal("event chain head mismatch".into()));
        }
        Ok(())
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn last_hash(&self) -> Hash32 {
        self.last_hash
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn record_hash(
    seq: u64,
    block: u64,
    timestamp: u64,
    prev: &Hash32,
    event: &Event,
) -> Result<Hash32> {
    let payload = serde_json::to_vec(event)
        .map_err(|e| KeelError::Internal(format!("event serialization: {e}")))?;
    let mut bytes = Vec::with_capacity(EVENT_RECORD_DOMAIN_V1.len() + 56 + payload.len());
    bytes.extend_from_slice(EVENT_RECORD_DOMAIN_V1);
    bytes.extend_from_slice(&seq.to_le_bytes());
    bytes.extend_from_slice(&block.to_le_bytes());
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&prev.0);
    bytes.extend_from_slice(&payload);
    Ok(sha256(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(amount: Amount) -> Event {
        Event::CurvePurchase {
            to: AccountId::named("alice"),
            amount_in: amount,
            amount_out: amount,
        }
    }

    #[test]
    fn chain_verifies_and_links() {
        let mut log = EventLog::new();
        log.append(1, 10, sample(1)).unwrap();
        log.append(2, 20, sample(2)).unwrap();
        log.append(3, 30, sample(3)).unwrap();
        log.verify().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[1].prev_hash, log.records()[0].hash);
        assert_eq!(log.last_hash(), log.records()[2].hash);
    }

    #[test]
    fn tampered_payload_breaks_the_chain() {
        let mut log = EventLog::new();
        log.append(1, 10, sample(1)).unwrap();
        log.append(2, 20, sample(2)).unwrap();
        log.records[1].event = sample(999);
        let err = log.verify().unwrap_err();
        assert!(matches!(err, KeelError::Internal(_)));
    }

    #[test]
    fn tampered_link_breaks_the_chain() {
        let mut log = EventLog::new();
        log.append(1, 10, sample(1)).unwrap();
        log.append(2, 20, sample(2)).unwrap();
        log.records[1].prev_hash = Hash32::ZERO;
        assert!(log.verify().is_err());
    }

    #[test]
    fn empty_log_verifies() {
        let log = EventLog::new();
        log.verify().unwrap();
        assert!(log.is_empty());
        assert_eq!(log.last_hash(), Hash32::ZERO);
    }
}
