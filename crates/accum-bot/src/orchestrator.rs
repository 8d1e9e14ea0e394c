//! Cycle orchestrator.
//!
//! Drives one cycle at a time through
//! `FETCH → FILTER → VOTE → SIZE → EXECUTE → PERSIST`, short-circuiting at
//! FILTER, VOTE or SIZE. The circuit breaker is checked before every fetch
//! and a trip halts the loop. Shutdown is cooperative: the flag is read at
//! the top of each iteration, never mid-cycle.
//!
//! Closed positions are fed back into the learning engines (allocation
//! EWMA and tabular Q-values) and into the performance tracker that the
//! circuit breaker reads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use accum_common::{ActionKind, Decision, MarketState};
use accum_market::{
    CachedFetcher, MarketDataError, MarketDataFetcher, MockMarketData, MockQuoteProvider,
    QuoteProvider, ReplayFetcher, RetryingQuoteProvider,
};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BotConfig, DataSource};
use crate::consensus::ConsensusVoter;
use crate::engine::{AllocationEngine, TabularEngine};
use crate::execution::{
    BundleSimulator, ExecutionError, ExecutionReport, ExecutionRequest, ExecutionRoute,
    ExecutionSimulator, PaperTrader, SimTrade, TradingSummary, TwapSimulator,
};
use crate::gate::{FilterResult, LogicGate};
use crate::metrics::{MetricsFile, MetricsWriter, PerformanceMetrics, PerformanceTracker};
use crate::risk::{CircuitBreaker, TripReason};
use crate::sizing::{LeverageEngine, PositionSize};
use crate::state::{ControlFlags, CounterSnapshot, CycleCounters};

/// Loop settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub symbol: String,
    /// Cycles to run; 0 runs until stopped.
    pub iterations: u64,
    pub cycle_delay: Duration,
    /// Execute approved entries; otherwise decide only.
    pub execute: bool,
    pub min_confidence: f64,
    /// Close a position after this many cycles (0 disables).
    pub max_hold_cycles: u64,
    /// Close remaining positions at the last snapshot when the loop ends.
    pub close_on_finish: bool,
    pub route: ExecutionRoute,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            symbol: "SOL".to_string(),
            iterations: 10,
            cycle_delay: Duration::from_secs(1),
            execute: false,
            min_confidence: 0.75,
            max_hold_cycles: 10,
            close_on_finish: true,
            route: ExecutionRoute::Paper,
        }
    }
}

/// Terminal status of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// An entry was filled, or positions were closed on Exit/Reduce.
    Executed,
    /// Approved and sized, but execution is disabled.
    Decided,
    Hold,
    /// Stopped by the gate, the confidence threshold or the margin stub.
    Blocked,
    /// Execution attempted but nothing filled.
    Rejected,
    Error,
    /// Circuit breaker tripped.
    Halted,
    /// Replay source ran out of snapshots.
    Exhausted,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStatus::Executed => "executed",
            CycleStatus::Decided => "decided",
            CycleStatus::Hold => "hold",
            CycleStatus::Blocked => "blocked",
            CycleStatus::Rejected => "rejected",
            CycleStatus::Error => "error",
            CycleStatus::Halted => "halted",
            CycleStatus::Exhausted => "exhausted",
        };
        write!(f, "{}", s)
    }
}

/// Everything that happened in one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub status: CycleStatus,
    pub filter: Option<FilterResult>,
    pub decision: Option<Decision>,
    pub position: Option<PositionSize>,
    pub execution: Option<ExecutionReport>,
    pub closed: Vec<SimTrade>,
    pub note: Option<String>,
}

impl CycleReport {
    fn new(cycle: u64, status: CycleStatus) -> Self {
        Self {
            cycle,
            status,
            filter: None,
            decision: None,
            position: None,
            execution: None,
            closed: Vec::new(),
            note: None,
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub counters: CounterSnapshot,
    pub rejected: u64,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub exhausted: bool,
    pub trading_summary: TradingSummary,
    pub performance: PerformanceMetrics,
}

/// Open-position context needed for feedback at close.
#[derive(Debug, Clone)]
struct OpenContext {
    opened_cycle: u64,
    snapshot: MarketState,
}

pub struct Orchestrator {
    config: RunConfig,
    fetcher: Arc<dyn MarketDataFetcher>,
    gate: LogicGate,
    voter: ConsensusVoter,
    sizing: LeverageEngine,
    ledger: PaperTrader,
    executor: Option<Box<dyn ExecutionSimulator>>,
    allocator: Option<Arc<AllocationEngine>>,
    tabular: Option<Arc<TabularEngine>>,
    breaker: CircuitBreaker,
    tracker: PerformanceTracker,
    writer: Option<MetricsWriter>,
    reference_quotes: Option<Arc<MockQuoteProvider>>,
    control: Arc<ControlFlags>,
    counters: CycleCounters,
    rejected: u64,
    open: HashMap<String, OpenContext>,
    last_snapshot: Option<MarketState>,
    halt_reason: Option<TripReason>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        fetcher: Arc<dyn MarketDataFetcher>,
        gate: LogicGate,
        voter: ConsensusVoter,
        sizing: LeverageEngine,
        ledger: PaperTrader,
        breaker: CircuitBreaker,
    ) -> Self {
        let tracker = PerformanceTracker::new(ledger.capital());
        Self {
            config,
            fetcher,
            gate,
            voter,
            sizing,
            ledger,
            executor: None,
            allocator: None,
            tabular: None,
            breaker,
            tracker,
            writer: None,
            reference_quotes: None,
            control: Arc::new(ControlFlags::new()),
            counters: CycleCounters::new(),
            rejected: 0,
            open: HashMap::new(),
            last_snapshot: None,
            halt_reason: None,
        }
    }

    /// Simulator for the sliced or bundle route. Without one, entries are
    /// filled by the paper ledger itself.
    pub fn with_executor(mut self, executor: Box<dyn ExecutionSimulator>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Allocation engine used for sizing and trade feedback. Register it
    /// with the voter separately if it should also vote.
    pub fn with_allocator(mut self, allocator: Arc<AllocationEngine>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Tabular engine that receives Q-updates when positions close.
    pub fn with_tabular(mut self, tabular: Arc<TabularEngine>) -> Self {
        self.tabular = Some(tabular);
        self
    }

    pub fn with_metrics_writer(mut self, writer: MetricsWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Quote stub whose reference price follows each fetched snapshot.
    pub fn with_reference_quotes(mut self, quotes: Arc<MockQuoteProvider>) -> Self {
        self.reference_quotes = Some(quotes);
        self
    }

    pub fn with_control(mut self, control: Arc<ControlFlags>) -> Self {
        self.control = control;
        self
    }

    /// Wire every component from a validated config.
    pub fn from_config(config: &BotConfig) -> Result<Self> {
        let fetcher: Arc<dyn MarketDataFetcher> = match config.data_source {
            DataSource::Mock => {
                let mock = MockMarketData::new(config.mock.clone());
                if config.cache_ttl.is_zero() {
                    Arc::new(mock)
                } else {
                    Arc::new(CachedFetcher::new(mock, config.cache_ttl))
                }
            }
            DataSource::Replay => {
                let Some(path) = &config.replay_path else {
                    bail!("Replay data source requires a replay path");
                };
                let replay = ReplayFetcher::from_file(path)
                    .with_context(|| format!("Failed to load replay file {:?}", path))?;
                info!(path = %path.display(), snapshots = replay.len(), "Replay loaded");
                Arc::new(replay)
            }
        };

        let mut voter = ConsensusVoter::new(config.consensus.clone());
        let mut allocator = None;
        let mut tabular = None;
        for name in &config.engines {
            match name.as_str() {
                "allocation" => {
                    let engine = Arc::new(AllocationEngine::new(config.allocation.clone()));
                    voter.register(engine.clone());
                    allocator = Some(engine);
                }
                "tabular" => {
                    let engine = Arc::new(TabularEngine::new(config.tabular.clone()));
                    voter.register(engine.clone());
                    tabular = Some(engine);
                }
                other => bail!("Unknown decision engine: {}", other),
            }
        }

        let ledger = PaperTrader::new(config.paper.clone());
        let sizing = LeverageEngine::new(config.leverage.clone(), ledger.capital());

        let mut orchestrator = Self::new(
            config.run.clone(),
            fetcher,
            LogicGate::new(config.gate.clone()),
            voter,
            sizing,
            ledger,
            CircuitBreaker::new(config.circuit_breaker.clone()),
        )
        .with_metrics_writer(MetricsWriter::new(&config.metrics_path));

        if let Some(engine) = allocator {
            orchestrator = orchestrator.with_allocator(engine);
        }
        if let Some(engine) = tabular {
            orchestrator = orchestrator.with_tabular(engine);
        }

        match config.run.route {
            ExecutionRoute::Paper => {}
            ExecutionRoute::Sliced => {
                let reference = Arc::new(MockQuoteProvider::new(config.mock.initial_price));
                let mut retry = config.quote_retry.clone();
                retry.fallback_price.get_or_insert(config.mock.initial_price);
                let quotes: Arc<dyn QuoteProvider> =
                    Arc::new(RetryingQuoteProvider::new(Arc::clone(&reference), retry));
                orchestrator = orchestrator
                    .with_executor(Box::new(TwapSimulator::new(config.sliced.clone(), quotes)))
                    .with_reference_quotes(reference);
            }
            ExecutionRoute::Bundle => {
                orchestrator = orchestrator
                    .with_executor(Box::new(BundleSimulator::new(config.bundle.clone())));
            }
        }

        Ok(orchestrator)
    }

    pub fn control(&self) -> Arc<ControlFlags> {
        Arc::clone(&self.control)
    }

    pub fn ledger(&self) -> &PaperTrader {
        &self.ledger
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Run until the iteration count, a shutdown request, a breaker trip or
    /// the end of the data source.
    pub async fn run(&mut self) -> RunSummary {
        info!(
            symbol = %self.config.symbol,
            iterations = self.config.iterations,
            execute = self.config.execute,
            route = %self.config.route,
            engines = self.voter.len(),
            "Starting decision loop"
        );

        let mut halted = false;
        let mut exhausted = false;
        let mut completed = 0u64;

        loop {
            if self.control.is_shutdown_requested() {
                info!(cycles = completed, "Shutdown requested, stopping loop");
                break;
            }
            if self.config.iterations > 0 && completed >= self.config.iterations {
                break;
            }

            let report = self.run_cycle().await;
            completed += 1;
            match report.status {
                CycleStatus::Halted => {
                    halted = true;
                    break;
                }
                CycleStatus::Exhausted => {
                    exhausted = true;
                    break;
                }
                _ => {}
            }

            let more = self.config.iterations == 0 || completed < self.config.iterations;
            if more && !self.config.cycle_delay.is_zero() {
                tokio::time::sleep(self.config.cycle_delay).await;
            }
        }

        if self.config.close_on_finish
            && self.ledger.open_count() > 0
            && let Some(snapshot) = self.last_snapshot.clone()
        {
            let closed = self.ledger.close_all(&snapshot);
            info!(count = closed.len(), "Closed remaining positions at end of run");
            for trade in &closed {
                self.on_closed(trade, &snapshot);
            }
            self.tracker.record_equity(Utc::now(), self.ledger.capital());
        }
        self.persist();

        let summary = RunSummary {
            counters: self.counters.snapshot(),
            rejected: self.rejected,
            halted,
            halt_reason: self.halt_reason.as_ref().map(|r| r.to_string()),
            exhausted,
            trading_summary: self.ledger.summary(),
            performance: self.tracker.metrics(),
        };
        info!(
            cycles = summary.counters.cycles,
            executed = summary.counters.executed,
            blocked = summary.counters.blocked,
            holds = summary.counters.holds,
            errors = summary.counters.errors,
            halted,
            capital = %summary.trading_summary.current_capital,
            "Decision loop finished"
        );
        summary
    }

    /// Run exactly one cycle and persist metrics.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let cycle = self.counters.inc_cycles();
        let report = self.cycle(cycle).await;

        match report.status {
            CycleStatus::Executed => self.counters.inc_executed(),
            CycleStatus::Decided => self.counters.inc_decided(),
            CycleStatus::Hold => self.counters.inc_holds(),
            CycleStatus::Blocked => self.counters.inc_blocked(),
            CycleStatus::Rejected => self.rejected += 1,
            CycleStatus::Error => self.counters.inc_errors(),
            CycleStatus::Halted | CycleStatus::Exhausted => {}
        }
        info!(
            cycle,
            status = %report.status,
            note = report.note.as_deref().unwrap_or(""),
            "Cycle complete"
        );

        self.tracker.record_equity(Utc::now(), self.ledger.capital());
        self.persist();
        report
    }

    async fn cycle(&mut self, cycle: u64) -> CycleReport {
        // Circuit breaker
        if let Some(reason) = self.breaker.check(&self.tracker.metrics()) {
            self.control.set_circuit_breaker_tripped(true);
            let note = reason.to_string();
            self.halt_reason = Some(reason);
            return CycleReport::new(cycle, CycleStatus::Halted).with_note(note);
        }

        // FETCH
        let snapshot = match self.fetcher.fetch(&self.config.symbol).await {
            Ok(s) => s,
            Err(MarketDataError::Exhausted(n)) => {
                info!(cycle, snapshots = n, "Data source exhausted");
                return CycleReport::new(cycle, CycleStatus::Exhausted);
            }
            Err(e) => {
                error!(cycle, error = %e, "Fetch failed");
                return CycleReport::new(cycle, CycleStatus::Error).with_note(e.to_string());
            }
        };
        if let Err(e) = snapshot.validate() {
            error!(cycle, error = %e, "Invalid snapshot");
            return CycleReport::new(cycle, CycleStatus::Error).with_note(e.to_string());
        }
        self.last_snapshot = Some(snapshot.clone());
        if let Some(quotes) = &self.reference_quotes {
            quotes.set_price(&self.config.symbol, snapshot.mid_price());
        }
        debug!(
            cycle,
            price = %snapshot.price,
            regime = %snapshot.regime.as_str(),
            "Snapshot fetched"
        );

        // FILTER
        let filter = self.gate.check(&snapshot);
        if !filter.allowed {
            info!(
                cycle,
                reasons = ?filter.reasons,
                risk_score = filter.risk_score,
                "Gate blocked cycle"
            );
            let mut report = CycleReport::new(cycle, CycleStatus::Blocked);
            report.note = Some(filter.details.join("; "));
            report.filter = Some(filter);
            return report;
        }

        // VOTE
        let decision = self
            .voter
            .run_and_assert(&snapshot, self.config.min_confidence)
            .await;
        let mut report = CycleReport::new(cycle, CycleStatus::Hold);
        report.filter = Some(filter);

        if decision.is_blocked() {
            info!(
                cycle,
                reasons = %decision.reason_codes(),
                confidence = decision.confidence,
                "Decision blocked"
            );
            report.status = CycleStatus::Blocked;
            report.decision = Some(decision);
            return report;
        }

        let kind = decision.action.kind;
        match kind {
            ActionKind::Hold => {
                report.decision = Some(decision);
                return report;
            }
            ActionKind::Exit | ActionKind::Reduce => {
                report.decision = Some(decision);
                if !self.config.execute {
                    report.status = CycleStatus::Decided;
                    return report;
                }
                report.closed = self.close_for(kind, &snapshot);
                report.status = if report.closed.is_empty() {
                    CycleStatus::Hold
                } else {
                    CycleStatus::Executed
                };
                return report;
            }
            ActionKind::Long | ActionKind::Short => {}
        }

        // SIZE
        let mut decision = decision;
        self.sizing.update_capital(self.ledger.available_capital());
        let fraction = match &self.allocator {
            Some(allocator) => allocator.get_allocation_fraction(1.0),
            None => decision.action.size.to_f64().unwrap_or(0.0),
        };
        let position = self
            .sizing
            .compute_position_size(&mut decision.action, &snapshot, fraction);
        report.position = Some(position);

        if position.notional <= Decimal::ZERO {
            report.status = CycleStatus::Blocked;
            report.decision = Some(decision);
            return report.with_note("no capital available");
        }
        if position.leverage > Decimal::ONE {
            let margin = self.sizing.request_margin(position.notional, position.leverage);
            if let Some(denial) = margin.denial {
                warn!(cycle, denial = %denial, "Margin request denied");
                report.status = CycleStatus::Blocked;
                report.decision = Some(decision);
                return report.with_note(denial.to_string());
            }
        }

        if !self.config.execute {
            info!(
                cycle,
                kind = %kind,
                notional = %position.notional,
                leverage = %position.leverage,
                "Decision sized (decide-only)"
            );
            report.status = CycleStatus::Decided;
            report.decision = Some(decision);
            return report;
        }

        // EXECUTE
        report.closed = self.expire_positions(cycle, &snapshot);

        let request = match ExecutionRequest::from_position(
            Uuid::new_v4().to_string(),
            &self.config.symbol,
            kind,
            &position,
        ) {
            Ok(r) => r,
            Err(e) => {
                error!(cycle, error = %e, "Invalid execution request");
                report.status = CycleStatus::Error;
                report.decision = Some(decision);
                return report.with_note(e.to_string());
            }
        };

        let execution = match self.execute(&request, &snapshot).await {
            Ok(r) => r,
            Err(e) => {
                error!(cycle, error = %e, "Execution failed");
                report.status = CycleStatus::Error;
                report.decision = Some(decision);
                return report.with_note(e.to_string());
            }
        };

        match &execution.trade_id {
            Some(trade_id) => {
                self.open.insert(
                    trade_id.clone(),
                    OpenContext {
                        opened_cycle: cycle,
                        snapshot: snapshot.clone(),
                    },
                );
                info!(
                    cycle,
                    trade_id = %trade_id,
                    kind = %kind,
                    route = %execution.route,
                    filled = execution.filled_count(),
                    notional = %execution.filled_notional(),
                    "Entry executed"
                );
                report.status = CycleStatus::Executed;
            }
            None => {
                let reasons: Vec<String> = execution
                    .rejections()
                    .map(|r| r.reason.code().to_string())
                    .collect();
                warn!(cycle, route = %execution.route, reasons = ?reasons, "Entry not filled");
                report.status = CycleStatus::Rejected;
                report.note = Some(reasons.join(","));
            }
        }
        report.decision = Some(decision);
        report.execution = Some(execution);
        report
    }

    /// Execute through the configured route; fills always land in the ledger.
    async fn execute(
        &mut self,
        request: &ExecutionRequest,
        snapshot: &MarketState,
    ) -> Result<ExecutionReport, ExecutionError> {
        match self.executor.as_mut() {
            Some(executor) => {
                let mut report = executor.execute(request, snapshot).await?;
                self.ledger.open_from_report(request, &mut report)?;
                Ok(report)
            }
            None => self.ledger.execute(request, snapshot).await,
        }
    }

    fn close_for(&mut self, kind: ActionKind, snapshot: &MarketState) -> Vec<SimTrade> {
        let closed = match kind {
            ActionKind::Exit => self.ledger.close_all(snapshot),
            ActionKind::Reduce => match self.ledger.close_oldest(snapshot) {
                Ok(trade) => trade.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "Reduce failed");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        for trade in &closed {
            self.on_closed(trade, snapshot);
        }
        closed
    }

    fn expire_positions(&mut self, cycle: u64, snapshot: &MarketState) -> Vec<SimTrade> {
        if self.config.max_hold_cycles == 0 {
            return Vec::new();
        }
        let expired: Vec<String> = self
            .open
            .iter()
            .filter(|(_, ctx)| {
                cycle.saturating_sub(ctx.opened_cycle) >= self.config.max_hold_cycles
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut closed = Vec::new();
        for id in expired {
            match self.ledger.close(&id, snapshot) {
                Ok(trade) => {
                    debug!(trade_id = %id, "Position reached max hold");
                    self.on_closed(&trade, snapshot);
                    closed.push(trade);
                }
                Err(e) => {
                    warn!(trade_id = %id, error = %e, "Expiry close failed");
                    self.open.remove(&id);
                }
            }
        }
        closed
    }

    /// Feed a closed trade back into the tracker and learning engines.
    fn on_closed(&mut self, trade: &SimTrade, close_snapshot: &MarketState) {
        self.tracker.record_trade(trade);
        let return_pct = trade.return_pct.unwrap_or(0.0);

        if let Some(allocator) = &self.allocator {
            allocator.record_trade(trade.is_win(), return_pct);
        }
        let ctx = self.open.remove(&trade.id);
        if let Some(tabular) = &self.tabular {
            let open_snapshot = ctx.as_ref().map(|c| &c.snapshot).unwrap_or(close_snapshot);
            tabular.update(open_snapshot, trade.kind, return_pct, close_snapshot, true);
        }
    }

    fn metrics_file(&self) -> MetricsFile {
        let summary = self.ledger.summary();
        let counters = self.counters.snapshot();
        MetricsFile {
            mode: if self.config.execute { "execute" } else { "decide" }.to_string(),
            cycle_count: counters.cycles,
            total_trades: counters.executed as usize,
            blocked_count: counters.blocked,
            last_updated: Utc::now(),
            trading_summary: summary,
            circuit_breaker_triggered: self.breaker.is_tripped(),
            halt_reason: self.halt_reason.as_ref().map(|r| r.to_string()),
            performance: self.tracker.metrics(),
        }
    }

    fn persist(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        if let Err(e) = writer.write(&self.metrics_file()) {
            error!(path = %writer.path().display(), error = %e, "Failed to write metrics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusConfig;
    use crate::engine::{DecisionEngine, EngineError};
    use crate::execution::PaperConfig;
    use crate::risk::CircuitBreakerConfig;
    use crate::sizing::LeverageConfig;
    use accum_common::{Action, MarketRegime};
    use accum_market::ReplayFetcher;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    /// Votes a fixed sequence of kinds, repeating the last.
    struct Script {
        kinds: parking_lot::Mutex<Vec<ActionKind>>,
    }

    impl Script {
        fn new(mut kinds: Vec<ActionKind>) -> Arc<Self> {
            kinds.reverse();
            Arc::new(Self {
                kinds: parking_lot::Mutex::new(kinds),
            })
        }
    }

    #[async_trait]
    impl DecisionEngine for Script {
        fn name(&self) -> &str {
            "script"
        }

        async fn evaluate(&self, _snapshot: &MarketState) -> Result<Action, EngineError> {
            let mut kinds = self.kinds.lock();
            let kind = if kinds.len() > 1 {
                kinds.pop().unwrap_or(ActionKind::Hold)
            } else {
                kinds.last().copied().unwrap_or(ActionKind::Hold)
            };
            Ok(Action::new(kind, 0.9).with_size(dec!(0.1)))
        }
    }

    fn snapshots(prices: &[Decimal]) -> Vec<MarketState> {
        prices
            .iter()
            .map(|p| {
                let mut s = MarketState::new("SOL", *p);
                s.volume_24h = dec!(200000);
                s.mev_risk_score = 0.1;
                s.latency_ms = 50.0;
                s.ema_short = Some(*p);
                s.ema_long = Some(*p);
                s.regime = MarketRegime::TrendingUp;
                s
            })
            .collect()
    }

    fn orchestrator(
        engine: Arc<dyn DecisionEngine>,
        prices: &[Decimal],
        execute: bool,
    ) -> Orchestrator {
        let mut voter = ConsensusVoter::new(ConsensusConfig::default());
        voter.register(engine);
        let ledger = PaperTrader::new(PaperConfig {
            base_slippage_bps: 0.0,
            ..Default::default()
        });
        let config = RunConfig {
            iterations: 0,
            cycle_delay: Duration::ZERO,
            execute,
            max_hold_cycles: 0,
            close_on_finish: true,
            ..Default::default()
        };
        Orchestrator::new(
            config,
            Arc::new(ReplayFetcher::new(snapshots(prices))),
            LogicGate::default(),
            voter,
            LeverageEngine::new(LeverageConfig::default(), ledger.capital()),
            ledger,
            CircuitBreaker::new(CircuitBreakerConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_exhausted_source_ends_run() {
        let mut orch = orchestrator(Script::new(vec![ActionKind::Hold]), &[dec!(100); 3], true);
        let summary = orch.run().await;
        assert!(summary.exhausted);
        assert!(!summary.halted);
        assert_eq!(summary.counters.holds, 3);
        assert_eq!(summary.counters.cycles, 4);
        assert_eq!(summary.trading_summary.current_capital, dec!(1000));
    }

    #[tokio::test]
    async fn test_long_then_exit_round_trip() {
        let script = Script::new(vec![ActionKind::Long, ActionKind::Hold, ActionKind::Exit]);
        let mut orch = orchestrator(script, &[dec!(100), dec!(100), dec!(110)], true);

        let first = orch.run_cycle().await;
        assert_eq!(first.status, CycleStatus::Executed);
        assert_eq!(orch.ledger().open_count(), 1);

        assert_eq!(orch.run_cycle().await.status, CycleStatus::Hold);

        let third = orch.run_cycle().await;
        assert_eq!(third.status, CycleStatus::Executed);
        assert_eq!(third.closed.len(), 1);
        assert!(third.closed[0].is_win());
        assert_eq!(orch.ledger().open_count(), 0);
        assert!(orch.ledger().capital() > dec!(1000));
    }

    #[tokio::test]
    async fn test_decide_only_never_touches_capital() {
        let mut orch = orchestrator(Script::new(vec![ActionKind::Long]), &[dec!(100); 3], false);
        let summary = orch.run().await;
        assert_eq!(summary.counters.decided, 3);
        assert_eq!(summary.trading_summary.current_capital, dec!(1000));
        assert_eq!(summary.trading_summary.total_trades, 0);
    }

    #[tokio::test]
    async fn test_close_on_finish_feeds_tracker() {
        let mut orch = orchestrator(
            Script::new(vec![ActionKind::Long, ActionKind::Hold]),
            &[dec!(100), dec!(90)],
            true,
        );
        let summary = orch.run().await;
        assert_eq!(summary.trading_summary.total_trades, 1);
        assert_eq!(summary.trading_summary.open_positions, 0);
        assert_eq!(summary.performance.total_trades, 1);
        assert_eq!(summary.performance.consecutive_losses, 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_cycle() {
        let mut orch = orchestrator(Script::new(vec![ActionKind::Hold]), &[dec!(100); 3], true);
        orch.control().request_shutdown();
        let summary = orch.run().await;
        assert_eq!(summary.counters.cycles, 0);
    }

    #[tokio::test]
    async fn test_metrics_file_counting() {
        let script = Script::new(vec![ActionKind::Long, ActionKind::Hold, ActionKind::Exit]);
        let mut orch = orchestrator(script, &[dec!(100), dec!(100), dec!(110)], true);
        let summary = orch.run().await;
        assert!(summary.exhausted);

        let file = orch.metrics_file();
        // The fetch that found the source exhausted is a cycle too
        assert_eq!(file.cycle_count, 4);
        // One entry plus one exit dispatched, one round trip closed
        assert_eq!(file.total_trades, 2);
        assert_eq!(file.trading_summary.total_trades, 1);
        assert_eq!(file.performance.total_trades, 1);
    }
}
