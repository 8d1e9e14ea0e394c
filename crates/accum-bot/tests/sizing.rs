//! Integration tests for leverage and position sizing.
//!
//! - leverage never exceeds the configured maximum
//! - leveraged exposure stays within max_position_pct × capital × max_leverage
//! - the margin stub approves and refuses as a provider would

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use accum_bot::sizing::{LeverageConfig, LeverageEngine, MarginDenial};
use accum_common::{Action, ActionKind, MarketState};

fn snapshot(volatility: f64, liquidity: f64) -> MarketState {
    let mut s = MarketState::new("SOL", dec!(100));
    s.volatility = volatility;
    s.liquidity_score = liquidity;
    s
}

// ============================================================================
// Position Size
// ============================================================================

#[test]
fn test_caps_hold_across_inputs() {
    let engine = LeverageEngine::new(LeverageConfig::default(), dec!(10000));
    let cfg = engine.config().clone();
    let ceiling = cfg.max_position_pct * engine.capital() * cfg.max_leverage;

    for requested in [dec!(1), dec!(2.5), dec!(5), dec!(9), dec!(100)] {
        for fraction in [0.0, 0.05, 0.3, 1.0, 4.0] {
            for confidence in [0.0, 0.5, 1.0] {
                for (vol, liq) in [(0.01, 1.0), (0.2, 1.0), (0.01, 0.3)] {
                    let mut action = Action::new(ActionKind::Long, confidence)
                        .with_leverage(requested);
                    let size = engine.compute_position_size(
                        &mut action,
                        &snapshot(vol, liq),
                        fraction,
                    );
                    assert!(size.leverage <= cfg.max_leverage);
                    assert!(size.leverage >= Decimal::ONE);
                    assert!(size.exposure() <= ceiling);
                    assert!(size.fraction <= cfg.max_position_pct);
                    assert_eq!(action.leverage, size.leverage);
                    assert_eq!(action.size, size.fraction);
                }
            }
        }
    }
}

#[test]
fn test_fraction_floor() {
    let engine = LeverageEngine::new(LeverageConfig::default(), dec!(1000));
    let mut action = Action::new(ActionKind::Long, 0.1);
    let size = engine.compute_position_size(&mut action, &snapshot(0.01, 1.0), 0.0);
    assert_eq!(size.fraction, dec!(0.01));
    assert_eq!(size.notional, dec!(10));
}

#[test]
fn test_high_volatility_dampens() {
    let engine = LeverageEngine::new(LeverageConfig::default(), dec!(1000));

    let mut calm = Action::new(ActionKind::Long, 1.0).with_leverage(dec!(3));
    let calm_size = engine.compute_position_size(&mut calm, &snapshot(0.01, 1.0), 0.2);

    let mut wild = Action::new(ActionKind::Long, 1.0).with_leverage(dec!(3));
    let wild_size = engine.compute_position_size(&mut wild, &snapshot(0.10, 1.0), 0.2);

    assert!(!calm_size.dampened);
    assert!(wild_size.dampened);
    assert!(wild_size.notional < calm_size.notional);
    assert!(wild_size.leverage < calm_size.leverage);
}

#[test]
fn test_capital_update_changes_notional() {
    let mut engine = LeverageEngine::new(LeverageConfig::default(), dec!(1000));
    let mut action = Action::new(ActionKind::Short, 1.0);
    let before = engine.compute_position_size(&mut action, &snapshot(0.01, 1.0), 0.1);

    engine.update_capital(dec!(500));
    let mut action = Action::new(ActionKind::Short, 1.0);
    let after = engine.compute_position_size(&mut action, &snapshot(0.01, 1.0), 0.1);
    assert_eq!(after.notional * dec!(2), before.notional);
}

// ============================================================================
// Margin Stub
// ============================================================================

#[test]
fn test_margin_approved_within_limits() {
    let engine = LeverageEngine::new(LeverageConfig::default(), dec!(1000));
    let response = engine.request_margin(dec!(200), dec!(3));
    assert!(response.approved);
    assert_eq!(response.buying_power, dec!(600));
    assert!(response.denial.is_none());
}

#[test]
fn test_margin_refusals() {
    let engine = LeverageEngine::new(LeverageConfig::default(), dec!(1000));

    let response = engine.request_margin(dec!(200), dec!(6));
    assert!(!response.approved);
    assert_eq!(response.buying_power, Decimal::ZERO);
    assert!(matches!(
        response.denial,
        Some(MarginDenial::LeverageTooHigh { .. })
    ));

    let response = engine.request_margin(dec!(1500), dec!(2));
    assert_eq!(
        response.denial.as_ref().map(|d| d.code()),
        Some("INSUFFICIENT_CAPITAL")
    );

    let response = engine.request_margin(dec!(0), dec!(2));
    assert_eq!(
        response.denial.as_ref().map(|d| d.code()),
        Some("INVALID_COLLATERAL")
    );
}
