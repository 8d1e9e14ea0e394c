//! Pluggable decision engines.
//!
//! Every engine implements [`DecisionEngine`]: given a snapshot, propose an
//! [`Action`]. The consensus voter holds an ordered registry of engines and
//! treats each call's `Result` explicitly, so a failing engine loses its
//! vote without taking the cycle down.
//!
//! Engines are stateful across calls. Their state sits behind
//! `parking_lot::Mutex` so `evaluate` can take `&self` and engines can be
//! shared as `Arc<dyn DecisionEngine>`; a lock is never held across an
//! await point.
//!
//! ## Engines
//!
//! - [`AllocationEngine`]: EWMA win-rate/return, Kelly-style sizing
//! - [`TabularEngine`]: epsilon-greedy Q-learning over bucketed states

pub mod allocation;
pub mod tabular;

use accum_common::{Action, MarketState, ValidationError};
use async_trait::async_trait;
use thiserror::Error;

pub use allocation::{AllocationConfig, AllocationEngine, AllocationState};
pub use tabular::{TabularConfig, TabularEngine, TabularState};

/// Errors an engine can return instead of a vote.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine {engine} failed: {reason}")]
    Evaluation { engine: String, reason: String },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(#[from] ValidationError),

    #[error("Engine {engine} timed out after {timeout_ms}ms")]
    Timeout { engine: String, timeout_ms: u64 },
}

impl EngineError {
    pub fn evaluation(engine: &str, reason: impl Into<String>) -> Self {
        EngineError::Evaluation {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }
}

/// A decision engine that votes once per cycle.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Short stable name used in logs and audit votes.
    fn name(&self) -> &str;

    /// Propose an action for this snapshot.
    async fn evaluate(&self, snapshot: &MarketState) -> Result<Action, EngineError>;
}
