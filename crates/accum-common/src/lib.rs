//! Shared types for the accumulation bot.
//!
//! This crate contains:
//! - Market snapshots (`MarketState`, `MarketRegime`) and their validation
//! - The canonical action vocabulary (`ActionKind`, `Action`, `Side`)
//! - Consensus output (`Decision`, `DecisionStatus`, `BlockReason`, `EngineVote`)
//!
//! CRITICAL: prices, notionals and fees use `rust_decimal::Decimal`.
//! Scores, probabilities and learned values are `f64`.

pub mod decision;
pub mod types;

pub use decision::*;
pub use types::*;
