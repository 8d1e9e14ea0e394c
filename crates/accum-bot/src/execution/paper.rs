//! Paper trading ledger with simulated fills.
//!
//! The `PaperTrader` is the single record of simulated capital. It fills
//! entries itself (paper route) or books fills priced by another simulator
//! (`open_from_report`), and tracks every position from open to close.
//!
//! ## Cost model
//!
//! - `slippage_bps = base · (1 + min(notional / size_norm, 1) + min(vol / vol_norm, 1))`
//! - long entry at `ask · (1 + slip)`, short entry at `bid · (1 − slip)`;
//!   exits mirror this on the opposite side of the book
//! - entry fee `notional · fee_rate`, deducted from capital immediately
//! - exit fee on the position value at exit
//!
//! ## Accounting
//!
//! A closed trade's `pnl` is net of both fees:
//! `notional · leverage · price_change − entry_fee − exit_fee`. Closing
//! credits `pnl + entry_fee` to capital, since the entry fee was already
//! taken at open.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use accum_common::{ActionKind, MarketState, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    ExecutionError, ExecutionReport, ExecutionRequest, ExecutionRoute, ExecutionSimulator,
    FillOutcome, FillRejection, RejectionReason, SimFill,
};

/// Configuration for the paper trader.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub initial_capital: Decimal,
    /// Fee rate (e.g., 0.0005 for 0.05%).
    pub fee_rate: Decimal,
    pub base_slippage_bps: f64,
    /// Notional at which the size factor saturates.
    pub size_normalization: Decimal,
    /// Volatility at which the volatility factor saturates.
    pub volatility_normalization: f64,
    /// Simulated fill latency.
    pub fill_latency: Duration,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::new(1000, 0), // $1,000
            fee_rate: Decimal::new(5, 4),           // 0.05%
            base_slippage_bps: 2.0,                 // 0.02%
            size_normalization: Decimal::new(1000, 0),
            volatility_normalization: 0.05,
            fill_latency: Duration::ZERO,
        }
    }
}

/// One simulated position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimTrade {
    pub id: String,
    pub symbol: String,
    pub kind: ActionKind,
    pub side: Side,
    pub entry_price: Decimal,
    pub notional: Decimal,
    pub leverage: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub slippage_bps: f64,
    pub is_closed: bool,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub return_pct: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SimTrade {
    /// Leveraged relative price change from entry to `price`.
    fn price_change(&self, price: Decimal) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let change = (price - self.entry_price) / self.entry_price;
        match self.side {
            Side::Buy => change,
            Side::Sell => -change,
        }
    }

    /// Mark-to-market P&L before exit costs.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.notional * self.leverage * self.price_change(price)
    }

    pub fn is_win(&self) -> bool {
        self.pnl.is_some_and(|p| p > Decimal::ZERO)
    }
}

/// Run-level summary of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSummary {
    /// Closed trades.
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Winning / closed, 0-1.
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    pub return_pct: f64,
    pub current_capital: Decimal,
    pub initial_capital: Decimal,
    pub open_positions: usize,
}

/// Paper trading ledger.
pub struct PaperTrader {
    config: PaperConfig,
    capital: Decimal,
    open: HashMap<String, SimTrade>,
    open_order: VecDeque<String>,
    closed: Vec<SimTrade>,
    next_trade_id: u64,
}

impl PaperTrader {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            capital: config.initial_capital,
            config,
            open: HashMap::new(),
            open_order: VecDeque::new(),
            closed: Vec::new(),
            next_trade_id: 1,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PaperConfig::default())
    }

    pub fn config(&self) -> &PaperConfig {
        &self.config
    }

    pub fn capital(&self) -> Decimal {
        self.capital
    }

    /// Capital not committed to open notionals.
    pub fn available_capital(&self) -> Decimal {
        let committed: Decimal = self.open.values().map(|t| t.notional).sum();
        self.capital - committed
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn get_open(&self, trade_id: &str) -> Option<&SimTrade> {
        self.open.get(trade_id)
    }

    /// Open trades, oldest first.
    pub fn open_trades(&self) -> impl Iterator<Item = &SimTrade> {
        self.open_order.iter().filter_map(|id| self.open.get(id))
    }

    pub fn closed_trades(&self) -> &[SimTrade] {
        &self.closed
    }

    /// Slippage in basis points for a notional at the given volatility.
    pub fn slippage_bps(&self, notional: Decimal, volatility: f64) -> f64 {
        let size_factor = if self.config.size_normalization > Decimal::ZERO {
            (notional / self.config.size_normalization)
                .to_f64()
                .unwrap_or(0.0)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        let vol_factor = if self.config.volatility_normalization > 0.0 {
            (volatility / self.config.volatility_normalization).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.config.base_slippage_bps * (1.0 + size_factor + vol_factor)
    }

    fn generate_trade_id(&mut self) -> String {
        let id = format!("paper-{}", self.next_trade_id);
        self.next_trade_id += 1;
        id
    }

    fn check_capital(&self, required: Decimal) -> Option<RejectionReason> {
        let available = self.available_capital();
        if required > available {
            return Some(RejectionReason::InsufficientCapital {
                available,
                required,
            });
        }
        None
    }

    fn book(&mut self, trade: SimTrade) -> SimTrade {
        self.capital -= trade.entry_fee;
        self.open_order.push_back(trade.id.clone());
        self.open.insert(trade.id.clone(), trade.clone());
        info!(
            trade_id = %trade.id,
            kind = %trade.kind,
            entry_price = %trade.entry_price,
            notional = %trade.notional,
            leverage = %trade.leverage,
            fee = %trade.entry_fee,
            capital = %self.capital,
            "Paper position opened"
        );
        trade
    }

    /// Book fills priced by another simulator as one position.
    ///
    /// Returns `Ok(None)` when the report has no fills or the filled
    /// notional is not covered by available capital.
    pub fn open_from_report(
        &mut self,
        request: &ExecutionRequest,
        report: &mut ExecutionReport,
    ) -> Result<Option<SimTrade>, ExecutionError> {
        let Some(entry_price) = report.average_price() else {
            return Ok(None);
        };
        let notional = report.filled_notional();
        let fee = report.total_fees();
        if let Some(reason) = self.check_capital(notional + fee) {
            warn!(request_id = %request.request_id, reason = %reason, "Fills not booked");
            return Ok(None);
        }

        let id = self.generate_trade_id();
        let trade = self.book(SimTrade {
            id: id.clone(),
            symbol: request.symbol.clone(),
            kind: request.kind,
            side: request.side,
            entry_price,
            notional,
            leverage: request.leverage,
            entry_fee: fee,
            exit_fee: Decimal::ZERO,
            slippage_bps: report.average_slippage_bps(),
            is_closed: false,
            exit_price: None,
            pnl: None,
            return_pct: None,
            opened_at: report.finished_at,
            closed_at: None,
        });
        report.trade_id = Some(id);
        Ok(Some(trade))
    }

    /// Close one open position at the snapshot's book.
    pub fn close(
        &mut self,
        trade_id: &str,
        snapshot: &MarketState,
    ) -> Result<SimTrade, ExecutionError> {
        let Some(mut trade) = self.open.remove(trade_id) else {
            return Err(ExecutionError::UnknownTrade(trade_id.to_string()));
        };
        self.open_order.retain(|id| id != trade_id);

        let slip_bps = self.slippage_bps(trade.notional, snapshot.volatility);
        let slip = Decimal::from_f64(slip_bps / 10_000.0).unwrap_or(Decimal::ZERO);
        let exit_price = match trade.side {
            Side::Buy => snapshot.bid * (Decimal::ONE - slip),
            Side::Sell => snapshot.ask * (Decimal::ONE + slip),
        };

        let exit_value = if trade.entry_price > Decimal::ZERO {
            trade.notional * exit_price / trade.entry_price
        } else {
            trade.notional
        };
        let exit_fee = exit_value * self.config.fee_rate;
        let gross = trade.unrealized_pnl(exit_price);
        let pnl = gross - trade.entry_fee - exit_fee;

        self.capital += gross - exit_fee;

        trade.exit_price = Some(exit_price);
        trade.exit_fee = exit_fee;
        trade.pnl = Some(pnl);
        trade.return_pct = if trade.notional > Decimal::ZERO {
            (pnl / trade.notional * Decimal::ONE_HUNDRED).to_f64()
        } else {
            Some(0.0)
        };
        trade.is_closed = true;
        trade.closed_at = Some(snapshot.timestamp);

        info!(
            trade_id = %trade.id,
            exit_price = %exit_price,
            pnl = %pnl,
            capital = %self.capital,
            "Paper position closed"
        );
        self.closed.push(trade.clone());
        Ok(trade)
    }

    /// Close the oldest open position, if any.
    pub fn close_oldest(
        &mut self,
        snapshot: &MarketState,
    ) -> Result<Option<SimTrade>, ExecutionError> {
        match self.open_order.front().cloned() {
            Some(id) => self.close(&id, snapshot).map(Some),
            None => Ok(None),
        }
    }

    /// Close every open position, oldest first.
    pub fn close_all(&mut self, snapshot: &MarketState) -> Vec<SimTrade> {
        let ids: Vec<String> = self.open_order.iter().cloned().collect();
        ids.iter()
            .filter_map(|id| self.close(id, snapshot).ok())
            .collect()
    }

    pub fn summary(&self) -> TradingSummary {
        let total = self.closed.len();
        let winning = self.closed.iter().filter(|t| t.is_win()).count();
        let total_pnl: Decimal = self.closed.iter().filter_map(|t| t.pnl).sum();
        let entry_fees: Decimal = self
            .closed
            .iter()
            .chain(self.open.values())
            .map(|t| t.entry_fee)
            .sum();
        let exit_fees: Decimal = self.closed.iter().map(|t| t.exit_fee).sum();
        let initial = self.config.initial_capital;
        let return_pct = if initial > Decimal::ZERO {
            ((self.capital - initial) / initial * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        TradingSummary {
            total_trades: total,
            winning_trades: winning,
            losing_trades: total - winning,
            win_rate: if total > 0 {
                winning as f64 / total as f64
            } else {
                0.0
            },
            total_pnl,
            total_fees: entry_fees + exit_fees,
            return_pct,
            current_capital: self.capital,
            initial_capital: initial,
            open_positions: self.open.len(),
        }
    }
}

#[async_trait]
impl ExecutionSimulator for PaperTrader {
    fn route(&self) -> ExecutionRoute {
        ExecutionRoute::Paper
    }

    async fn execute(
        &mut self,
        request: &ExecutionRequest,
        snapshot: &MarketState,
    ) -> Result<ExecutionReport, ExecutionError> {
        let started_at = Utc::now();
        let mut report =
            ExecutionReport::new(&request.request_id, ExecutionRoute::Paper, started_at);

        let slippage_bps = self.slippage_bps(request.notional, snapshot.volatility);
        let slip = Decimal::from_f64(slippage_bps / 10_000.0).unwrap_or(Decimal::ZERO);
        let price = match request.side {
            Side::Buy => snapshot.ask * (Decimal::ONE + slip),
            Side::Sell => snapshot.bid * (Decimal::ONE - slip),
        };
        let fee = request.notional * self.config.fee_rate;

        if let Some(reason) = self.check_capital(request.notional + fee) {
            debug!(request_id = %request.request_id, reason = %reason, "Paper order rejected");
            report.outcomes.push(FillOutcome::Rejected(FillRejection {
                slice_index: 0,
                reason,
                timestamp: Utc::now(),
            }));
            report.finished_at = Utc::now();
            return Ok(report);
        }

        if !self.config.fill_latency.is_zero() {
            tokio::time::sleep(self.config.fill_latency).await;
        }

        let id = self.generate_trade_id();
        let now = Utc::now();
        report.outcomes.push(FillOutcome::Filled(SimFill {
            fill_id: id.clone(),
            slice_index: 0,
            side: request.side,
            price,
            notional: request.notional,
            fee,
            slippage_bps,
            latency_ms: self.config.fill_latency.as_secs_f64() * 1000.0,
            timestamp: now,
        }));
        self.book(SimTrade {
            id: id.clone(),
            symbol: request.symbol.clone(),
            kind: request.kind,
            side: request.side,
            entry_price: price,
            notional: request.notional,
            leverage: request.leverage,
            entry_fee: fee,
            exit_fee: Decimal::ZERO,
            slippage_bps,
            is_closed: false,
            exit_price: None,
            pnl: None,
            return_pct: None,
            opened_at: snapshot.timestamp,
            closed_at: None,
        });
        report.trade_id = Some(id);
        report.finished_at = now;
        Ok(report)
    }
}
