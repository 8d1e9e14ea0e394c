//! Integration tests for the execution simulators.
//!
//! These tests verify the three routes end to end:
//! - paper fills and ledger reconciliation
//! - time-sliced execution against a quote provider
//! - bundle inclusion and fees

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use accum_bot::execution::{
    BundleConfig, BundleSimulator, ExecutionRequest, ExecutionSimulator, PaperConfig,
    PaperTrader, RejectionReason, SlicedConfig, TwapSimulator,
};
use accum_common::{ActionKind, MarketState, Side};
use accum_market::{MockQuoteProvider, Quote, QuoteError, QuoteProvider};

// ============================================================================
// Test Helpers
// ============================================================================

/// Quotes every notional at a fixed slippage.
struct FixedSlippage {
    bps: f64,
}

#[async_trait]
impl QuoteProvider for FixedSlippage {
    async fn get_quote(
        &self,
        _symbol: &str,
        notional: Decimal,
        _side: Side,
    ) -> Result<Quote, QuoteError> {
        Ok(Quote {
            price: dec!(100),
            slippage_bps: self.bps,
            fee: notional * dec!(0.001),
            is_fallback: false,
        })
    }
}

fn flat(price: Decimal) -> MarketState {
    MarketState::new("SOL", price)
}

fn request(kind: ActionKind, notional: Decimal) -> ExecutionRequest {
    ExecutionRequest::new("req-1", "SOL", kind, notional, dec!(1)).unwrap()
}

fn fast_slices() -> SlicedConfig {
    SlicedConfig {
        num_slices: 5,
        slice_interval: Duration::ZERO,
        slippage_tolerance_bps: 100.0,
        execution_latency: Duration::ZERO,
    }
}

// ============================================================================
// Paper
// ============================================================================

#[tokio::test]
async fn test_paper_round_trip_reconciles() {
    let mut trader = PaperTrader::new(PaperConfig {
        base_slippage_bps: 0.0,
        ..Default::default()
    });

    let report = trader
        .execute(&request(ActionKind::Long, dec!(100)), &flat(dec!(100)))
        .await
        .unwrap();
    assert!(report.is_success());
    let trade_id = report.trade_id.clone().unwrap();
    assert_eq!(trader.capital(), dec!(999.95));

    let closed = trader.close(&trade_id, &flat(dec!(110))).unwrap();
    // gross 10, entry fee 0.05, exit fee 0.055
    assert_eq!(closed.pnl, Some(dec!(9.895)));
    assert_eq!(trader.capital(), dec!(1009.895));

    let summary = trader.summary();
    assert_eq!(summary.total_trades, 1);
    assert_eq!(summary.winning_trades, 1);
    assert_eq!(
        summary.current_capital - summary.initial_capital,
        summary.total_pnl
    );
}

#[tokio::test]
async fn test_paper_short_loses_on_rally() {
    let mut trader = PaperTrader::new(PaperConfig {
        base_slippage_bps: 0.0,
        fee_rate: Decimal::ZERO,
        ..Default::default()
    });
    let report = trader
        .execute(&request(ActionKind::Short, dec!(200)), &flat(dec!(100)))
        .await
        .unwrap();
    let closed = trader
        .close(report.trade_id.as_deref().unwrap(), &flat(dec!(105)))
        .unwrap();
    assert_eq!(closed.pnl, Some(dec!(-10)));
    assert!(!closed.is_win());
}

#[tokio::test]
async fn test_paper_rejects_beyond_capital() {
    let mut trader = PaperTrader::with_defaults();
    let report = trader
        .execute(&request(ActionKind::Long, dec!(5000)), &flat(dec!(100)))
        .await
        .unwrap();
    assert!(!report.is_success());
    assert_eq!(trader.open_count(), 0);
    assert_eq!(trader.capital(), dec!(1000));
}

// ============================================================================
// Time-Sliced
// ============================================================================

#[tokio::test]
async fn test_twap_all_slices_exceed_tolerance() {
    let quotes: Arc<dyn QuoteProvider> = Arc::new(FixedSlippage { bps: 500.0 });
    let mut twap = TwapSimulator::new(fast_slices(), quotes);

    let report = twap
        .execute(&request(ActionKind::Long, dec!(100)), &flat(dec!(100)))
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.rejected_count(), 5);
    for rejection in report.rejections() {
        assert!(matches!(
            rejection.reason,
            RejectionReason::SlippageExceeded { .. }
        ));
        assert_eq!(rejection.reason.code(), "SLIPPAGE_EXCEEDED");
    }
    assert_eq!(report.filled_notional(), Decimal::ZERO);
}

#[tokio::test]
async fn test_twap_fills_within_tolerance() {
    let quotes: Arc<dyn QuoteProvider> = Arc::new(FixedSlippage { bps: 20.0 });
    let mut twap = TwapSimulator::new(fast_slices(), quotes);

    let report = twap
        .execute(&request(ActionKind::Long, dec!(100)), &flat(dec!(100)))
        .await
        .unwrap();
    assert_eq!(report.filled_count(), 5);
    assert_eq!(report.filled_notional(), dec!(100));
    assert_eq!(report.average_price(), Some(dec!(100)));
}

#[tokio::test]
async fn test_twap_fills_book_into_ledger() {
    let quotes: Arc<dyn QuoteProvider> = Arc::new(MockQuoteProvider::new(dec!(100)));
    let mut twap = TwapSimulator::new(fast_slices(), quotes);
    let mut ledger = PaperTrader::with_defaults();

    let req = request(ActionKind::Long, dec!(100));
    let mut report = twap.execute(&req, &flat(dec!(100))).await.unwrap();
    let trade = ledger.open_from_report(&req, &mut report).unwrap().unwrap();

    assert_eq!(report.trade_id.as_deref(), Some(trade.id.as_str()));
    assert_eq!(trade.notional, report.filled_notional());
    assert_eq!(ledger.open_count(), 1);
}

// ============================================================================
// Bundle
// ============================================================================

#[tokio::test]
async fn test_bundle_fill_pays_tip_fee() {
    let mut bundle = BundleSimulator::new(BundleConfig {
        inclusion_probability: 1.0,
        simulate_delay: false,
        ..Default::default()
    });
    let report = bundle
        .execute(&request(ActionKind::Long, dec!(100)), &flat(dec!(100)))
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.total_fees(), dec!(0.0015));
}

#[tokio::test]
async fn test_bundle_never_included() {
    let mut bundle = BundleSimulator::new(BundleConfig {
        inclusion_probability: 0.0,
        simulate_delay: false,
        ..Default::default()
    });
    let report = bundle
        .execute(&request(ActionKind::Short, dec!(100)), &flat(dec!(100)))
        .await
        .unwrap();
    assert_eq!(report.rejected_count(), 1);
    assert_eq!(report.total_fees(), Decimal::ZERO);
}
