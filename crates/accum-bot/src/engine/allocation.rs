//! Kelly-style allocation engine.
//!
//! Tracks an exponentially weighted win rate `w` and average return `r̄`
//! over realized trades:
//!
//! ```text
//! w ← α·win + (1−α)·w
//! r̄ ← α·return + (1−α)·r̄
//! ```
//!
//! Both start from neutral priors (`w = 0.5`, `r̄ = 0`) so the estimates
//! move gradually as history accumulates. The suggested fraction is a
//! half-Kelly heuristic:
//!
//! ```text
//! fraction = clamp(max(0, 2w − 1) · |r̄| · 0.5 · confidence, min, max)
//! ```
//!
//! with `r̄` in percent units. Fewer than two trades of history always
//! yields `min_allocation`.

use accum_common::{Action, ActionKind, MarketRegime, MarketState, clamp_unit};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Serialize;
use tracing::debug;

use super::{DecisionEngine, EngineError};

/// Configuration for the allocation engine.
#[derive(Debug, Clone)]
pub struct AllocationConfig {
    /// EWMA smoothing factor (0-1, higher = more weight on recent trades).
    pub ewma_alpha: f64,
    pub min_allocation: f64,
    pub max_allocation: f64,
    /// Leverage proposed at full edge; scaled down linearly with edge.
    pub leverage_ceiling: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            min_allocation: 0.01,
            max_allocation: 0.5,
            leverage_ceiling: 3.0,
        }
    }
}

/// Serializable view of the EWMA state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AllocationState {
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub trade_count: u64,
}

impl Default for AllocationState {
    fn default() -> Self {
        Self {
            win_rate: 0.5,
            avg_return_pct: 0.0,
            trade_count: 0,
        }
    }
}

/// EWMA-driven allocator and directional voter.
pub struct AllocationEngine {
    name: String,
    config: AllocationConfig,
    state: Mutex<AllocationState>,
}

impl AllocationEngine {
    pub fn new(config: AllocationConfig) -> Self {
        Self {
            name: "allocation".to_string(),
            config,
            state: Mutex::new(AllocationState::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AllocationConfig::default())
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn state(&self) -> AllocationState {
        *self.state.lock()
    }

    /// Fold one realized trade into the EWMA estimates.
    pub fn record_trade(&self, won: bool, return_pct: f64) {
        let alpha = self.config.ewma_alpha;
        let mut state = self.state.lock();
        let win = if won { 1.0 } else { 0.0 };
        state.win_rate = clamp_unit(alpha * win + (1.0 - alpha) * state.win_rate);
        if return_pct.is_finite() {
            state.avg_return_pct = alpha * return_pct + (1.0 - alpha) * state.avg_return_pct;
        }
        state.trade_count += 1;
        debug!(
            won,
            return_pct,
            win_rate = state.win_rate,
            avg_return_pct = state.avg_return_pct,
            trades = state.trade_count,
            "Allocation state updated"
        );
    }

    /// Suggested fraction of capital for a caller-supplied confidence.
    pub fn get_allocation_fraction(&self, confidence: f64) -> f64 {
        let state = self.state();
        let (min, max) = (self.config.min_allocation, self.config.max_allocation);
        if state.trade_count < 2 {
            return min;
        }
        let edge = (2.0 * state.win_rate - 1.0).max(0.0);
        let kelly = edge * state.avg_return_pct.abs() * 0.5 * clamp_unit(confidence);
        kelly.clamp(min, max)
    }

    fn direction(regime: MarketRegime) -> ActionKind {
        match regime {
            MarketRegime::TrendingUp => ActionKind::Long,
            MarketRegime::TrendingDown => ActionKind::Short,
            _ => ActionKind::Hold,
        }
    }
}

#[async_trait]
impl DecisionEngine for AllocationEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, snapshot: &MarketState) -> Result<Action, EngineError> {
        let state = self.state();
        let kind = Self::direction(snapshot.regime);
        let confidence = if state.trade_count < 2 {
            0.5
        } else {
            clamp_unit(state.win_rate)
        };

        let fraction = self.get_allocation_fraction(confidence);
        let edge = (2.0 * state.win_rate - 1.0).max(0.0);
        let leverage = 1.0 + edge * (self.config.leverage_ceiling - 1.0).max(0.0);

        let mut action = Action::new(kind, confidence)
            .with_meta("win_rate", state.win_rate)
            .with_meta("avg_return_pct", state.avg_return_pct)
            .with_meta("trade_count", state.trade_count);
        if kind.is_entry() {
            action.set_size(Decimal::from_f64(fraction).unwrap_or(Decimal::ZERO));
            action.set_leverage(Decimal::from_f64(leverage).unwrap_or(Decimal::ONE));
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_min_allocation_without_history() {
        let engine = AllocationEngine::with_defaults();
        for confidence in [0.0, 0.3, 1.0] {
            assert_eq!(engine.get_allocation_fraction(confidence), 0.01);
        }
        engine.record_trade(true, 5.0);
        assert_eq!(engine.get_allocation_fraction(1.0), 0.01);
    }

    #[test]
    fn test_ewma_from_priors() {
        let engine = AllocationEngine::with_defaults();
        engine.record_trade(true, 1.0);
        let state = engine.state();
        assert!((state.win_rate - 0.6).abs() < 1e-12);
        assert!((state.avg_return_pct - 0.2).abs() < 1e-12);
        engine.record_trade(false, -1.0);
        let state = engine.state();
        assert!((state.win_rate - 0.48).abs() < 1e-12);
        assert_eq!(state.trade_count, 2);
    }

    #[test]
    fn test_losing_history_stays_at_min() {
        let engine = AllocationEngine::with_defaults();
        for _ in 0..10 {
            engine.record_trade(false, -2.0);
        }
        assert_eq!(engine.get_allocation_fraction(1.0), 0.01);
    }

    #[test]
    fn test_allocation_capped() {
        let engine = AllocationEngine::with_defaults();
        for _ in 0..50 {
            engine.record_trade(true, 10.0);
        }
        assert_eq!(engine.get_allocation_fraction(1.0), 0.5);
    }

    #[tokio::test]
    async fn test_direction_follows_regime() {
        let engine = AllocationEngine::with_defaults();
        let mut snapshot = MarketState::new("SOL", dec!(100));

        snapshot.regime = MarketRegime::TrendingUp;
        let action = engine.evaluate(&snapshot).await.unwrap();
        assert_eq!(action.kind, ActionKind::Long);
        assert_eq!(action.confidence, 0.5);
        assert_eq!(action.size, dec!(0.01));

        snapshot.regime = MarketRegime::TrendingDown;
        assert_eq!(engine.evaluate(&snapshot).await.unwrap().kind, ActionKind::Short);

        snapshot.regime = MarketRegime::Ranging;
        let action = engine.evaluate(&snapshot).await.unwrap();
        assert_eq!(action.kind, ActionKind::Hold);
        assert_eq!(action.size, Decimal::ZERO);
    }
}
