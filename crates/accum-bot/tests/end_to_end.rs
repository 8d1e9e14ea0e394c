//! End-to-end tests through the orchestrator.
//!
//! These tests drive whole runs from recorded snapshots:
//! - a calm market with a holding engine leaves capital untouched
//! - consecutive losses trip the circuit breaker and mark the run unhealthy
//! - a run built from configuration writes a healthy metrics file

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use accum_bot::config::{BotConfig, CliOverrides};
use accum_bot::consensus::{ConsensusConfig, ConsensusVoter};
use accum_bot::engine::{DecisionEngine, EngineError};
use accum_bot::execution::{PaperConfig, PaperTrader};
use accum_bot::gate::LogicGate;
use accum_bot::metrics::{HealthStatus, MetricsWriter, check_health};
use accum_bot::orchestrator::{CycleStatus, Orchestrator, RunConfig};
use accum_bot::risk::{CircuitBreaker, CircuitBreakerConfig};
use accum_bot::sizing::{LeverageConfig, LeverageEngine};
use accum_common::{Action, ActionKind, MarketRegime, MarketState};
use accum_market::ReplayFetcher;

// ============================================================================
// Test Helpers
// ============================================================================

struct AlwaysHold;

#[async_trait]
impl DecisionEngine for AlwaysHold {
    fn name(&self) -> &str {
        "hold"
    }

    async fn evaluate(&self, _snapshot: &MarketState) -> Result<Action, EngineError> {
        Ok(Action::hold(0.9))
    }
}

/// Opens a long, then exits on the next call, forever.
struct InAndOut {
    calls: AtomicUsize,
}

#[async_trait]
impl DecisionEngine for InAndOut {
    fn name(&self) -> &str {
        "in_and_out"
    }

    async fn evaluate(&self, _snapshot: &MarketState) -> Result<Action, EngineError> {
        let kind = if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            ActionKind::Long
        } else {
            ActionKind::Exit
        };
        Ok(Action::new(kind, 0.9).with_size(dec!(0.1)))
    }
}

fn calm_snapshots(prices: &[Decimal]) -> Vec<MarketState> {
    prices
        .iter()
        .map(|p| {
            let mut s = MarketState::new("SOL", *p);
            s.volume_24h = dec!(200000);
            s.mev_risk_score = 0.1;
            s.latency_ms = 50.0;
            s.ema_short = Some(*p);
            s.ema_long = Some(*p);
            s.regime = MarketRegime::Ranging;
            s
        })
        .collect()
}

fn build(
    engine: Arc<dyn DecisionEngine>,
    prices: &[Decimal],
    breaker: CircuitBreakerConfig,
) -> Orchestrator {
    let mut voter = ConsensusVoter::new(ConsensusConfig::default());
    voter.register(engine);
    let ledger = PaperTrader::new(PaperConfig {
        base_slippage_bps: 0.0,
        ..Default::default()
    });
    let config = RunConfig {
        iterations: prices.len() as u64,
        cycle_delay: Duration::ZERO,
        execute: true,
        min_confidence: 0.75,
        max_hold_cycles: 0,
        close_on_finish: true,
        ..Default::default()
    };
    Orchestrator::new(
        config,
        Arc::new(ReplayFetcher::new(calm_snapshots(prices))),
        LogicGate::default(),
        voter,
        LeverageEngine::new(LeverageConfig::default(), ledger.capital()),
        ledger,
        CircuitBreaker::new(breaker),
    )
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_calm_market_holding_engine_keeps_capital() {
    let prices = [dec!(100), dec!(100.5), dec!(101), dec!(100.8), dec!(101.2)];
    let gate = LogicGate::default();
    for s in calm_snapshots(&prices) {
        assert!(gate.check(&s).allowed);
    }

    let mut orch = build(
        Arc::new(AlwaysHold),
        &prices,
        CircuitBreakerConfig::default(),
    );
    let initial = orch.ledger().capital();

    for _ in 0..prices.len() {
        let report = orch.run_cycle().await;
        assert!(
            matches!(report.status, CycleStatus::Hold | CycleStatus::Blocked),
            "unexpected status {}",
            report.status
        );
        let decision = report.decision.as_ref().unwrap();
        assert!(decision.is_blocked() || decision.action.kind == ActionKind::Hold);
        assert_eq!(orch.ledger().capital(), initial);
    }
    assert_eq!(orch.counters().cycles, 5);
    assert_eq!(orch.ledger().open_count(), 0);
}

#[tokio::test]
async fn test_consecutive_losses_halt_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let prices = [dec!(100), dec!(95), dec!(100), dec!(95), dec!(100)];
    let engine = Arc::new(InAndOut {
        calls: AtomicUsize::new(0),
    });
    let mut orch = build(
        engine,
        &prices,
        CircuitBreakerConfig {
            max_consecutive_losses: 1,
            ..Default::default()
        },
    )
    .with_metrics_writer(MetricsWriter::new(&path));

    let summary = orch.run().await;
    assert!(summary.halted);
    assert!(summary.halt_reason.is_some());
    // the entry and the losing exit
    assert_eq!(summary.counters.executed, 2);
    assert_eq!(summary.trading_summary.total_trades, 1);
    assert_eq!(summary.trading_summary.losing_trades, 1);
    assert!(summary.trading_summary.current_capital < dec!(1000));
    assert!(orch.control().is_circuit_breaker_tripped());

    match check_health(&path) {
        HealthStatus::Unhealthy(reason) => assert!(!reason.is_empty()),
        HealthStatus::Healthy => panic!("halted run reported healthy"),
    }
}

#[tokio::test]
async fn test_configured_mock_run_is_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("metrics.json");

    let mut config = BotConfig::default();
    config.apply_cli_overrides(CliOverrides {
        iterations: Some(3),
        delay_ms: Some(0),
        output: Some(path.clone()),
        seed: Some(11),
        ..Default::default()
    });
    config.validate().unwrap();

    let mut orch = Orchestrator::from_config(&config).unwrap();
    let summary = orch.run().await;

    assert!(!summary.halted);
    assert_eq!(summary.counters.cycles, 3);
    assert_eq!(summary.counters.executed, 0);
    assert_eq!(summary.trading_summary.current_capital, dec!(1000));
    assert!(check_health(&path).is_healthy());

    let file = MetricsWriter::read(&path).unwrap();
    assert_eq!(file.mode, "decide");
    assert_eq!(file.cycle_count, 3);
}
