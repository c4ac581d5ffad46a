use serde::{Deserialize, Serialize};

use crate::{hash, Hash32, KeelError, Result};

/// Fixed 18-decimal base unit. All monetary amounts are integers scaled by WAD.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Granularity for allocation-target weights and fee ratios expressed in
/// basis points (one weight unit = 0.01%).
pub const BPS_U16: u16 = 10_000;
pub const BPS_U64: u64 = 10_000;

/// Token amount in 18-decimal base units.
///
/// Products of two amounts can exceed `u128`; all multiply-then-divide goes
/// through the 256-bit helpers in [`crate::math`].
pub type Amount = u128;

/// Basis points in `[0, 10_000]` (correct-by-construction).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Bps(u16);

impl Bps {
    pub const ZERO: Bps = Bps(0);
    pub const MAX: Bps = Bps(BPS_U16);

    /// Constructs a bounded bps value.
    ///
    /// Preconditions:
    /// - `v <= 10_000` (else returns an error; fail-closed).
    ///
    /// Postconditions:
    /// - `self.get()` is always in `[0, 10_000]` and can be used without re-checking.
    pub fn new(v: u16) -> Result<Bps> {
        if v <= BPS_U16 {
            Ok(Bps(v))
        } else {
            Err(KeelError::InvalidInput(format!(
                "bps out of range: {v} > {BPS_U16}"
            )))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }

    pub fn as_u128(self) -> u128 {
        self.0 as u128
    }
}

impl TryFrom<u16> for Bps {
    type Error = KeelError;
    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        Bps::new(value)
    }
}

impl From<Bps> for u16 {
    fn from(value: Bps) -> u16 {
        value.get()
    }
}

/// Account identifier (content-addressed; no key material).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Hash32);

impl AccountId {
    pub const DOMAIN_V1: &'static [u8] = b"KEEL_ACCOUNT_ID_V1";

    /// Derives an account id from a human-readable name.
    ///
    /// Rationale: ids are content-addressed (domain-separated hash) so tests
    /// and drivers can agree on accounts without a registry; the kernel itself
    /// never interprets the name.
    pub fn named(name: &str) -> AccountId {
        AccountId(hash::sha256_domain(Self::DOMAIN_V1, name.as_bytes()))
    }

    pub fn short_hex(self) -> String {
        hex::encode(&self.0 .0[..4])
    }
}

/// Identifier for an AMM pair, derived from the ordered token pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairId(pub Hash32);

impl PairId {
    pub const DOMAIN_V1: &'static [u8] = b"KEEL_PAIR_ID_V1";

    /// Deterministically derives a pair identifier from two token ids.
    ///
    /// Token order is canonicalized first, so `derive(a, b) == derive(b, a)`.
    pub fn derive(a: TokenId, b: TokenId) -> PairId {
        let (t0, t1) = if a <= b { (a, b) } else { (b, a) };
        let mut bytes = Vec::with_capacity(Self::DOMAIN_V1.len() + 64);
        bytes.extend_from_slice(Self::DOMAIN_V1);
        bytes.extend_from_slice(&t0.tag().0);
        bytes.extend_from_slice(&t1.tag().0);
        PairId(hash::sha256(&bytes))
    }

    pub fn short_hex(self) -> String {
        hex::encode(&self.0 .0[..4])
    }
}

/// Token identifier.
///
/// The kernel manages exactly three primary assets plus one LP token per AMM
/// pair. LP tokens are first-class ledger entries like everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TokenId {
    /// Reserve collateral asset backing the stablecoin.
    Reserve,
    /// The stablecoin itself.
    Stable,
    /// Governance token distributed by genesis and the farms.
    Gov,
    /// Liquidity-provider token of an AMM pair.
    Lp(PairId),
}

impl TokenId {
    const TOKEN_TAG_DOMAIN_V1: &'static [u8] = b"KEEL_TOKEN_TAG_V1";

    /// Canonical 32-byte tag used when a token id participates in a hash
    /// preimage (pair derivation, event chain).
    pub fn tag(self) -> Hash32 {
        match self {
            TokenId::Reserve => hash::sha256_domain(Self::TOKEN_TAG_DOMAIN_V1, b"reserve"),
            TokenId::Stable => hash::sha256_domain(Self::TOKEN_TAG_DOMAIN_V1, b"stable"),
            TokenId::Gov => hash::sha256_domain(Self::TOKEN_TAG_DOMAIN_V1, b"gov"),
            TokenId::Lp(pair) => hash::sha256_domain(Self::TOKEN_TAG_DOMAIN_V1, &pair.0 .0),
        }
    }

    /// Short human-readable label for logs and reports.
    pub fn label(self) -> String {
        match self {
            TokenId::Reserve => "reserve".into(),
            TokenId::Stable => "stable".into(),
            TokenId::Gov => "gov".into(),
            TokenId::Lp(pair) => format!("lp:{}", pair.short_hex()),
        }
    }
}

/// Treasury deposit identifier (registry index, assigned sequentially).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepositId(pub u32);

/// Farm pool identifier (index into a farm's pool vector).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId(pub u32);

/// Which of the two farm instances an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FarmKind {
    /// Shares are staked LP tokens; custody moves through the ledger.
    Stake,
    /// Shares are recorded swap volume in anchor-token units.
    Volume,
}
