//! Deterministic pre-decision risk filter.
//!
//! The gate runs before any decision engine is invoked and short-circuits
//! the cycle when a hard rule fires. Every rule is evaluated independently,
//! so a rejected snapshot reports all the rules it violated, not just the
//! first.
//!
//! ## Rules
//!
//! | Rule | Reason | Risk weight |
//! |------|--------|-------------|
//! | front-running risk above max | `HIGH_MEV_RISK` | 0.3 |
//! | latency above max | `HIGH_LATENCY` | 0.2 |
//! | 24h volume below min | `LOW_VOLUME` | 0.2 |
//! | price vs short EMA above max jump | `PRICE_JUMP` | 0.2 |
//! | short vs long EMA above max divergence | `EMA_DEVIATION` | 0.2 |
//! | bid-ask spread above max | `PRICE_JUMP` | 0.1 |

use accum_common::{BlockReason, MarketState};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Thresholds for the logic gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum front-running risk score (0-1).
    pub max_mev_risk: f64,
    /// Maximum round-trip latency in milliseconds.
    pub max_latency_ms: f64,
    /// Maximum |price - short EMA| as a percent of the short EMA.
    pub max_price_jump_pct: f64,
    /// Maximum |short EMA - long EMA| as a percent of the long EMA.
    pub max_ema_deviation_pct: f64,
    /// Minimum 24h volume (quote currency).
    pub min_volume_24h: Decimal,
    /// Maximum bid-ask spread as a percent of the bid.
    pub max_spread_pct: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_mev_risk: 0.7,
            max_latency_ms: 500.0,
            max_price_jump_pct: 5.0,
            max_ema_deviation_pct: 10.0,
            min_volume_24h: Decimal::ONE_THOUSAND,
            max_spread_pct: 5.0,
        }
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterResult {
    /// True iff no rule fired.
    pub allowed: bool,
    /// Distinct reasons, in rule order.
    pub reasons: Vec<BlockReason>,
    /// One human-readable line per fired rule.
    pub details: Vec<String>,
    /// Accumulated rule weights, capped at 1.
    pub risk_score: f64,
}

impl FilterResult {
    fn new() -> Self {
        Self {
            allowed: true,
            reasons: Vec::new(),
            details: Vec::new(),
            risk_score: 0.0,
        }
    }

    fn fire(&mut self, reason: BlockReason, weight: f64, detail: String) {
        self.allowed = false;
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
        self.details.push(detail);
        self.risk_score = (self.risk_score + weight).min(1.0);
    }
}

/// Stateless hard-rule filter.
#[derive(Debug, Clone, Default)]
pub struct LogicGate {
    config: GateConfig,
}

impl LogicGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate every rule against the snapshot.
    pub fn check(&self, snapshot: &MarketState) -> FilterResult {
        let cfg = &self.config;
        let mut result = FilterResult::new();

        if snapshot.mev_risk_score > cfg.max_mev_risk {
            result.fire(
                BlockReason::HighMevRisk,
                0.3,
                format!(
                    "MEV risk too high: {:.2} > {:.2}",
                    snapshot.mev_risk_score, cfg.max_mev_risk
                ),
            );
        }

        if snapshot.latency_ms > cfg.max_latency_ms {
            result.fire(
                BlockReason::HighLatency,
                0.2,
                format!(
                    "Latency too high: {:.0}ms > {:.0}ms",
                    snapshot.latency_ms, cfg.max_latency_ms
                ),
            );
        }

        if snapshot.volume_24h < cfg.min_volume_24h {
            result.fire(
                BlockReason::LowVolume,
                0.2,
                format!(
                    "Volume too low: {} < {}",
                    snapshot.volume_24h, cfg.min_volume_24h
                ),
            );
        }

        if let Some(short) = snapshot.ema_short
            && let Some(jump) = pct_distance(snapshot.price, short)
            && jump > cfg.max_price_jump_pct
        {
            result.fire(
                BlockReason::PriceJump,
                0.2,
                format!(
                    "Price jump vs short EMA: {:.2}% > {:.2}%",
                    jump, cfg.max_price_jump_pct
                ),
            );
        }

        if let (Some(short), Some(long)) = (snapshot.ema_short, snapshot.ema_long)
            && let Some(divergence) = pct_distance(short, long)
            && divergence > cfg.max_ema_deviation_pct
        {
            result.fire(
                BlockReason::EmaDeviation,
                0.2,
                format!(
                    "EMA divergence: {:.2}% > {:.2}%",
                    divergence, cfg.max_ema_deviation_pct
                ),
            );
        }

        let spread = snapshot.spread_pct().max(snapshot.spread_bps / 100.0);
        if spread > cfg.max_spread_pct {
            result.fire(
                BlockReason::PriceJump,
                0.1,
                format!(
                    "Bid-ask spread too wide: {:.2}% > {:.2}%",
                    spread, cfg.max_spread_pct
                ),
            );
        }

        result
    }
}

/// `|value - reference| / reference * 100`, or None for a non-positive
/// reference.
fn pct_distance(value: Decimal, reference: Decimal) -> Option<f64> {
    if reference <= Decimal::ZERO {
        return None;
    }
    ((value - reference).abs() / reference * Decimal::ONE_HUNDRED).to_f64()
}
