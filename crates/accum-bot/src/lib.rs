//! Simulated trading-decision pipeline.
//!
//! Given a market snapshot, decide whether to act, how large a position to
//! take, and model what executing it would cost, without touching a venue.
//!
//! ## Architecture
//!
//! - **Gate first**: hard risk rules short-circuit the cycle before any
//!   engine runs
//! - **Pluggable engines**: each votes independently, failures lose the vote
//! - **Single ledger**: every execution route books into the paper trader
//!
//! ## Modules
//!
//! - `gate`: deterministic hard-rule filter
//! - `engine`: allocation (Kelly-style) and tabular (Q-learning) engines
//! - `consensus`: concurrent vote collection and aggregation
//! - `sizing`: leverage and position sizing, margin stub
//! - `execution`: paper, time-sliced and bundle simulators
//! - `risk`: loss-limit circuit breaker
//! - `metrics`: performance tracking and the persisted metrics file
//! - `orchestrator`: the cycle loop
//! - `config`: TOML configuration with env and CLI overrides

pub mod config;
pub mod consensus;
pub mod engine;
pub mod execution;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod risk;
pub mod sizing;
pub mod state;

pub use config::{BotConfig, CliOverrides, DataSource};
pub use consensus::{ConsensusConfig, ConsensusVoter, EngineOutcome, EngineReport, aggregate};
pub use engine::{
    AllocationConfig, AllocationEngine, DecisionEngine, EngineError, TabularConfig, TabularEngine,
};
pub use execution::{
    BundleConfig, BundleSimulator, ExecutionError, ExecutionReport, ExecutionRequest,
    ExecutionRoute, ExecutionSimulator, FillOutcome, PaperConfig, PaperTrader, RejectionReason,
    SimFill, SimTrade, SlicedConfig, TradingSummary, TwapSimulator,
};
pub use gate::{FilterResult, GateConfig, LogicGate};
pub use metrics::{
    HealthStatus, MetricsError, MetricsFile, MetricsWriter, PerformanceMetrics,
    PerformanceTracker, check_health,
};
pub use orchestrator::{CycleReport, CycleStatus, Orchestrator, RunConfig, RunSummary};
pub use risk::{CircuitBreaker, CircuitBreakerConfig, TripKind, TripReason};
pub use sizing::{LeverageConfig, LeverageEngine, MarginDenial, MarginResponse, PositionSize};
pub use state::{ControlFlags, CounterSnapshot, CycleCounters};
