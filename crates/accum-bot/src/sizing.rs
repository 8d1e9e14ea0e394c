//! Leverage and position sizing.
//!
//! Turns an approved decision into a concrete notional and leverage:
//!
//! 1. `fraction = allocation_fraction × confidence` (× liquidity score when
//!    liquidity scaling is on), clamped to `[min_position_pct, max_position_pct]`
//! 2. `leverage = min(requested, max_leverage)`, floored at 1
//! 3. above the volatility threshold: `fraction × 0.7`, `leverage × 0.6`
//!    (floored at 1)
//! 4. `notional = capital × fraction`
//!
//! So `notional × leverage ≤ max_position_pct × capital × max_leverage`
//! always holds.

use accum_common::{Action, MarketState};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Serialize;
use tracing::debug;

/// Configuration for the leverage engine.
#[derive(Debug, Clone)]
pub struct LeverageConfig {
    pub max_leverage: Decimal,
    pub max_position_pct: Decimal,
    pub min_position_pct: Decimal,
    /// Volatility above which size and leverage are dampened.
    pub high_volatility_threshold: f64,
    pub volatility_size_dampening: Decimal,
    pub volatility_leverage_dampening: Decimal,
    /// Multiply the fraction by the snapshot's liquidity score.
    pub scale_by_liquidity: bool,
    /// Interest quoted by the margin stub, per trade.
    pub margin_interest_rate: Decimal,
}

impl Default for LeverageConfig {
    fn default() -> Self {
        Self {
            max_leverage: Decimal::new(5, 0),
            max_position_pct: Decimal::new(35, 2),
            min_position_pct: Decimal::new(1, 2),
            high_volatility_threshold: 0.05,
            volatility_size_dampening: Decimal::new(7, 1),
            volatility_leverage_dampening: Decimal::new(6, 1),
            scale_by_liquidity: true,
            margin_interest_rate: Decimal::new(1, 4),
        }
    }
}

/// Final size for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSize {
    /// Un-leveraged quote-currency amount committed.
    pub notional: Decimal,
    pub leverage: Decimal,
    /// Fraction of capital used for `notional`.
    pub fraction: Decimal,
    pub dampened: bool,
}

impl PositionSize {
    /// Leveraged exposure.
    pub fn exposure(&self) -> Decimal {
        self.notional * self.leverage
    }
}

/// Why the margin stub refused a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MarginDenial {
    LeverageTooHigh { requested: Decimal, max: Decimal },
    InsufficientCapital { collateral: Decimal, available: Decimal },
    InvalidCollateral { collateral: Decimal },
}

impl MarginDenial {
    pub fn code(&self) -> &'static str {
        match self {
            MarginDenial::LeverageTooHigh { .. } => "LEVERAGE_TOO_HIGH",
            MarginDenial::InsufficientCapital { .. } => "INSUFFICIENT_CAPITAL",
            MarginDenial::InvalidCollateral { .. } => "INVALID_COLLATERAL",
        }
    }
}

impl std::fmt::Display for MarginDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarginDenial::LeverageTooHigh { requested, max } => {
                write!(f, "Leverage too high: {}x > {}x", requested, max)
            }
            MarginDenial::InsufficientCapital {
                collateral,
                available,
            } => {
                write!(
                    f,
                    "Insufficient capital: collateral={}, available={}",
                    collateral, available
                )
            }
            MarginDenial::InvalidCollateral { collateral } => {
                write!(f, "Invalid collateral: {}", collateral)
            }
        }
    }
}

/// Result of a margin request. A refusal is data, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginResponse {
    pub approved: bool,
    pub collateral: Decimal,
    pub leverage: Decimal,
    /// `collateral × leverage` when approved, zero otherwise.
    pub buying_power: Decimal,
    pub interest_rate: Decimal,
    pub denial: Option<MarginDenial>,
}

impl MarginResponse {
    fn denied(collateral: Decimal, leverage: Decimal, denial: MarginDenial) -> Self {
        Self {
            approved: false,
            collateral,
            leverage,
            buying_power: Decimal::ZERO,
            interest_rate: Decimal::ZERO,
            denial: Some(denial),
        }
    }
}

/// Capital-aware sizing engine.
#[derive(Debug, Clone)]
pub struct LeverageEngine {
    config: LeverageConfig,
    capital: Decimal,
}

impl LeverageEngine {
    pub fn new(config: LeverageConfig, capital: Decimal) -> Self {
        Self { config, capital }
    }

    pub fn config(&self) -> &LeverageConfig {
        &self.config
    }

    pub fn capital(&self) -> Decimal {
        self.capital
    }

    /// Track the ledger's current capital.
    pub fn update_capital(&mut self, capital: Decimal) {
        self.capital = capital.max(Decimal::ZERO);
    }

    /// Size an approved action and write the final size/leverage back into it.
    pub fn compute_position_size(
        &self,
        action: &mut Action,
        snapshot: &MarketState,
        allocation_fraction: f64,
    ) -> PositionSize {
        let cfg = &self.config;

        let mut scale = allocation_fraction.max(0.0) * action.confidence;
        if cfg.scale_by_liquidity {
            scale *= snapshot.liquidity_score.clamp(0.0, 1.0);
        }
        let mut fraction = Decimal::from_f64(scale)
            .unwrap_or(Decimal::ZERO)
            .clamp(cfg.min_position_pct, cfg.max_position_pct);

        let mut leverage = action.leverage.min(cfg.max_leverage).max(Decimal::ONE);

        let dampened = snapshot.volatility > cfg.high_volatility_threshold;
        if dampened {
            fraction *= cfg.volatility_size_dampening;
            leverage = (leverage * cfg.volatility_leverage_dampening).max(Decimal::ONE);
        }
        // Dampening factors above 1 must not break the caps.
        fraction = fraction.min(cfg.max_position_pct);
        leverage = leverage.min(cfg.max_leverage);

        let notional = (self.capital * fraction).round_dp(8);

        action.set_size(fraction);
        action.set_leverage(leverage);
        action
            .metadata
            .insert("allocation_fraction".to_string(), allocation_fraction.into());
        action.metadata.insert(
            "capital".to_string(),
            self.capital.to_f64().unwrap_or(0.0).into(),
        );

        debug!(
            notional = %notional,
            leverage = %leverage,
            fraction = %fraction,
            dampened,
            "Position sized"
        );

        PositionSize {
            notional,
            leverage,
            fraction,
            dampened,
        }
    }

    /// Margin-provider stand-in: approves when leverage is within limits
    /// and collateral is covered by current capital.
    pub fn request_margin(&self, collateral: Decimal, leverage: Decimal) -> MarginResponse {
        if collateral <= Decimal::ZERO {
            return MarginResponse::denied(
                collateral,
                leverage,
                MarginDenial::InvalidCollateral { collateral },
            );
        }
        if leverage > self.config.max_leverage || leverage < Decimal::ONE {
            return MarginResponse::denied(
                collateral,
                leverage,
                MarginDenial::LeverageTooHigh {
                    requested: leverage,
                    max: self.config.max_leverage,
                },
            );
        }
        if collateral > self.capital {
            return MarginResponse::denied(
                collateral,
                leverage,
                MarginDenial::InsufficientCapital {
                    collateral,
                    available: self.capital,
                },
            );
        }
        MarginResponse {
            approved: true,
            collateral,
            leverage,
            buying_power: collateral * leverage,
            interest_rate: self.config.margin_interest_rate,
            denial: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accum_common::ActionKind;
    use rust_decimal_macros::dec;

    fn engine() -> LeverageEngine {
        LeverageEngine::new(LeverageConfig::default(), dec!(1000))
    }

    fn calm() -> MarketState {
        let mut s = MarketState::new("SOL", dec!(100));
        s.liquidity_score = 1.0;
        s.volatility = 0.01;
        s
    }

    #[test]
    fn test_fraction_scaled_and_clamped() {
        let mut action = Action::new(ActionKind::Long, 0.5).with_leverage(dec!(2));
        let size = engine().compute_position_size(&mut action, &calm(), 0.4);
        assert_eq!(size.fraction, dec!(0.2));
        assert_eq!(size.notional, dec!(200));
        assert_eq!(size.leverage, dec!(2));
        assert_eq!(action.size, dec!(0.2));

        let mut action = Action::new(ActionKind::Long, 1.0);
        let size = engine().compute_position_size(&mut action, &calm(), 0.9);
        assert_eq!(size.fraction, dec!(0.35));

        let mut action = Action::new(ActionKind::Long, 0.1);
        let size = engine().compute_position_size(&mut action, &calm(), 0.01);
        assert_eq!(size.fraction, dec!(0.01));
    }

    #[test]
    fn test_leverage_capped_by_config() {
        let mut cfg = LeverageConfig::default();
        cfg.max_leverage = dec!(3);
        let engine = LeverageEngine::new(cfg, dec!(1000));
        let mut action = Action::new(ActionKind::Long, 1.0).with_leverage(dec!(5));
        let size = engine.compute_position_size(&mut action, &calm(), 0.2);
        assert_eq!(size.leverage, dec!(3));
        assert_eq!(action.leverage, dec!(3));
    }

    #[test]
    fn test_high_volatility_dampens() {
        let mut s = calm();
        s.volatility = 0.08;
        let mut action = Action::new(ActionKind::Short, 0.5).with_leverage(dec!(4));
        let size = engine().compute_position_size(&mut action, &s, 0.4);
        assert!(size.dampened);
        assert_eq!(size.fraction, dec!(0.14));
        assert_eq!(size.leverage, dec!(2.4));

        let mut action = Action::new(ActionKind::Short, 0.5).with_leverage(dec!(1));
        let size = engine().compute_position_size(&mut action, &s, 0.4);
        assert_eq!(size.leverage, dec!(1));
    }

    #[test]
    fn test_liquidity_scaling() {
        let mut s = calm();
        s.liquidity_score = 0.5;
        let mut action = Action::new(ActionKind::Long, 1.0);
        let size = engine().compute_position_size(&mut action, &s, 0.4);
        assert_eq!(size.fraction, dec!(0.2));
    }

    #[test]
    fn test_margin_stub() {
        let engine = engine();
        let ok = engine.request_margin(dec!(100), dec!(3));
        assert!(ok.approved);
        assert_eq!(ok.buying_power, dec!(300));

        let too_high = engine.request_margin(dec!(100), dec!(6));
        assert!(!too_high.approved);
        assert_eq!(too_high.denial.as_ref().unwrap().code(), "LEVERAGE_TOO_HIGH");

        let broke = engine.request_margin(dec!(5000), dec!(2));
        assert_eq!(broke.denial.unwrap().code(), "INSUFFICIENT_CAPITAL");
        assert_eq!(broke.buying_power, Decimal::ZERO);
    }
}
