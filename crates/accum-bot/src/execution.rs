//! Simulated execution.
//!
//! This module provides the `ExecutionSimulator` trait that models turning a
//! sized entry into fills without touching a venue:
//! - `PaperTrader`: fee + slippage ledger with open/close tracking
//! - `TwapSimulator`: equal time-sliced orders, each re-quoted and
//!   slippage-checked
//! - `BundleSimulator`: latency + probabilistic inclusion of a priority bundle
//!
//! ## Flow
//!
//! 1. The orchestrator builds an `ExecutionRequest` from a sized decision
//! 2. The simulator returns an `ExecutionReport` with one `FillOutcome` per
//!    attempt (one for paper and bundle, one per slice for TWAP)
//! 3. Fills from the sliced and bundle routes are booked into the paper
//!    ledger, which stays the single record of capital

pub mod bundle;
pub mod paper;
pub mod sliced;

use std::fmt;

use accum_common::{ActionKind, MarketState, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sizing::PositionSize;

pub use bundle::{BundleConfig, BundleSimulator};
pub use paper::{PaperConfig, PaperTrader, SimTrade, TradingSummary};
pub use sliced::{SlicedConfig, TwapSimulator};

/// Errors that can occur during simulated execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown trade: {0}")]
    UnknownTrade(String),
}

/// How entries are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionRoute {
    #[default]
    Paper,
    Sliced,
    Bundle,
}

impl ExecutionRoute {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "paper" => Some(ExecutionRoute::Paper),
            "sliced" | "twap" => Some(ExecutionRoute::Sliced),
            "bundle" => Some(ExecutionRoute::Bundle),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionRoute::Paper => write!(f, "paper"),
            ExecutionRoute::Sliced => write!(f, "sliced"),
            ExecutionRoute::Bundle => write!(f, "bundle"),
        }
    }
}

/// A sized entry to simulate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub request_id: String,
    pub symbol: String,
    pub kind: ActionKind,
    pub side: Side,
    /// Un-leveraged quote-currency amount.
    pub notional: Decimal,
    pub leverage: Decimal,
}

impl ExecutionRequest {
    /// Build a request for an entry kind. Exit, reduce and hold are not
    /// executable entries.
    pub fn new(
        request_id: impl Into<String>,
        symbol: impl Into<String>,
        kind: ActionKind,
        notional: Decimal,
        leverage: Decimal,
    ) -> Result<Self, ExecutionError> {
        let side = kind.entry_side().ok_or_else(|| {
            ExecutionError::InvalidRequest(format!("{} is not an entry", kind))
        })?;
        if notional <= Decimal::ZERO {
            return Err(ExecutionError::InvalidRequest(format!(
                "notional must be positive, got {}",
                notional
            )));
        }
        if leverage < Decimal::ONE {
            return Err(ExecutionError::InvalidRequest(format!(
                "leverage must be at least 1, got {}",
                leverage
            )));
        }
        Ok(Self {
            request_id: request_id.into(),
            symbol: symbol.into(),
            kind,
            side,
            notional,
            leverage,
        })
    }

    pub fn from_position(
        request_id: impl Into<String>,
        symbol: impl Into<String>,
        kind: ActionKind,
        size: &PositionSize,
    ) -> Result<Self, ExecutionError> {
        Self::new(request_id, symbol, kind, size.notional, size.leverage)
    }
}

/// One simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimFill {
    pub fill_id: String,
    pub slice_index: usize,
    pub side: Side,
    pub price: Decimal,
    pub notional: Decimal,
    pub fee: Decimal,
    pub slippage_bps: f64,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Why an attempt did not fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    SlippageExceeded { slippage_bps: f64, tolerance_bps: f64 },
    NotIncluded { latency_ms: f64 },
    QuoteFailed { reason: String },
    InsufficientCapital { available: Decimal, required: Decimal },
}

impl RejectionReason {
    /// Get a short code for this reason.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::SlippageExceeded { .. } => "SLIPPAGE_EXCEEDED",
            RejectionReason::NotIncluded { .. } => "NOT_INCLUDED",
            RejectionReason::QuoteFailed { .. } => "QUOTE_FAILED",
            RejectionReason::InsufficientCapital { .. } => "INSUFFICIENT_CAPITAL",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::SlippageExceeded {
                slippage_bps,
                tolerance_bps,
            } => write!(
                f,
                "Slippage {:.1}bps exceeds tolerance {:.1}bps",
                slippage_bps, tolerance_bps
            ),
            RejectionReason::NotIncluded { latency_ms } => {
                write!(f, "Bundle not included after {:.0}ms", latency_ms)
            }
            RejectionReason::QuoteFailed { reason } => write!(f, "Quote failed: {}", reason),
            RejectionReason::InsufficientCapital {
                available,
                required,
            } => write!(
                f,
                "Insufficient capital: available={}, required={}",
                available, required
            ),
        }
    }
}

/// A recorded non-fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRejection {
    pub slice_index: usize,
    pub reason: RejectionReason,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FillOutcome {
    Filled(SimFill),
    Rejected(FillRejection),
}

impl FillOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, FillOutcome::Rejected(_))
    }

    pub fn fill(&self) -> Option<&SimFill> {
        match self {
            FillOutcome::Filled(fill) => Some(fill),
            FillOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&FillRejection> {
        match self {
            FillOutcome::Filled(_) => None,
            FillOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Every attempt made for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub request_id: String,
    pub route: ExecutionRoute,
    pub outcomes: Vec<FillOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ledger trade opened from this report, if any.
    pub trade_id: Option<String>,
}

impl ExecutionReport {
    pub fn new(request_id: &str, route: ExecutionRoute, started_at: DateTime<Utc>) -> Self {
        Self {
            request_id: request_id.to_string(),
            route,
            outcomes: Vec::new(),
            started_at,
            finished_at: started_at,
            trade_id: None,
        }
    }

    /// True when at least one attempt filled.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().any(FillOutcome::is_filled)
    }

    pub fn fills(&self) -> impl Iterator<Item = &SimFill> {
        self.outcomes.iter().filter_map(FillOutcome::fill)
    }

    pub fn rejections(&self) -> impl Iterator<Item = &FillRejection> {
        self.outcomes.iter().filter_map(FillOutcome::rejection)
    }

    pub fn filled_count(&self) -> usize {
        self.fills().count()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejections().count()
    }

    pub fn filled_notional(&self) -> Decimal {
        self.fills().map(|f| f.notional).sum()
    }

    pub fn total_fees(&self) -> Decimal {
        self.fills().map(|f| f.fee).sum()
    }

    /// Notional-weighted average fill price (harmonic mean over quantity).
    pub fn average_price(&self) -> Option<Decimal> {
        let quantity: Decimal = self
            .fills()
            .filter(|f| f.price > Decimal::ZERO)
            .map(|f| f.notional / f.price)
            .sum();
        if quantity <= Decimal::ZERO {
            return None;
        }
        Some(self.filled_notional() / quantity)
    }

    /// Notional-weighted slippage across fills.
    pub fn average_slippage_bps(&self) -> f64 {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for fill in self.fills() {
            let w = fill.notional.to_f64().unwrap_or(0.0);
            weighted += fill.slippage_bps * w;
            total += w;
        }
        if total > 0.0 { weighted / total } else { 0.0 }
    }
}

/// A model of executing an entry.
#[async_trait]
pub trait ExecutionSimulator: Send {
    fn route(&self) -> ExecutionRoute;

    async fn execute(
        &mut self,
        request: &ExecutionRequest,
        snapshot: &MarketState,
    ) -> Result<ExecutionReport, ExecutionError>;
}
