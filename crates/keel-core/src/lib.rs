//! Keel tokenomics kernel.
//!
//! Keel is the economic core of a collateral-backed stablecoin protocol:
//! a one-time genesis auction that bootstraps liquidity and price, a bonding
//! curve that mints stablecoin against reserve collateral at a controlled
//! premium, and epoch-vested farms that drip a governance token to liquidity
//! providers and traders.
//!
//! Design goals:
//! - Deterministic and bounded arithmetic (256-bit intermediates, floor division)
//! - Fail-closed on malformed/unknown inputs (callers validate at boundaries)
//! - IO-free core (pure state machine); integration layers provide storage/time
//! - No partial commits: every operation validates fully before mutating
//!
//! The only entry points are the `&mut self` methods on [`engine::Protocol`].
//! Callers supply identity (`AccountId`) explicitly and advance the simulated
//! clock themselves; the kernel never reads ambient time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod amm;
pub mod bounds;
pub mod config;
pub mod core;
pub mod curve;
pub mod engine;
pub mod events;
pub mod farm;
pub mod genesis;
pub mod hash;
pub mod invariants;
pub mod math;
pub mod oracle;
pub mod pcv;
pub mod redemption;
pub mod swap_mining;
pub mod token;
pub mod types;
pub mod vesting;

pub use bounds::RuntimeBounds;
pub use config::ProtocolParams;
pub use engine::Protocol;
pub use events::{Event, EventLog, EventRecord};
pub use invariants::{InvariantId, InvariantViolation};
pub use math::{Ratio, U256};
pub use types::{AccountId, Amount, DepositId, PairId, PoolId, TokenId, WAD};

/// 32-byte hash newtype used for derived identifiers (accounts, pairs, events).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

/// Kernel error taxonomy.
///
/// Every error is terminal for the triggering operation: state is never
/// partially committed, and the kernel never retries. `Paused` is checked
/// before all other validation in pausable entry points, so a paused
/// component reports `Paused` even for inputs that would otherwise be
/// invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeelError {
    // Input validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Math error: {0}")]
    Math(String),

    // Lifecycle errors
    #[error("Paused: {0}")]
    Paused(String),

    #[error("Phase error: {0}")]
    Phase(String),

    #[error("Timing error: {0}")]
    Timing(String),

    #[error("Already done: {0}")]
    AlreadyDone(String),

    // Authorization errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Funds / capacity errors
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Slippage: {0}")]
    Slippage(String),

    #[error("Capacity: {0}")]
    Capacity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors (serialization, unreachable states)
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, KeelError>;
