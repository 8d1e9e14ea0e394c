//! Performance tracking and the persisted metrics file.
//!
//! `PerformanceTracker` turns closed trades and equity points into the
//! figures the circuit breaker checks. `MetricsWriter` persists a
//! `MetricsFile` atomically after every cycle, and `check_health` is the
//! consumer side used by the health binary.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::execution::{SimTrade, TradingSummary};

/// Errors from metrics persistence.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Derived performance figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    /// Winning / closed, 0-1.
    pub win_rate: f64,
    pub avg_return_pct: f64,
    /// Largest peak-to-trough equity decline, in percent.
    pub max_drawdown_pct: f64,
    /// Mean over standard deviation of per-trade returns, unannualised.
    pub sharpe_ratio: f64,
    pub consecutive_losses: u32,
    /// Loss on the UTC day of the most recent trade, percent of that
    /// day's opening equity. Zero when the day is flat or positive.
    pub daily_loss_pct: f64,
    pub peak_equity: Decimal,
    pub current_equity: Decimal,
}

/// Running mean and variance of per-trade returns (Welford).
#[derive(Debug, Clone, Copy, Default)]
struct ReturnStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl ReturnStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn mean(&self) -> f64 {
        if self.count > 0 { self.mean } else { 0.0 }
    }

    /// Mean over sample standard deviation; zero without dispersion.
    fn sharpe(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let std = (self.m2 / (self.count - 1) as f64).sqrt();
        if std > 1e-12 { self.mean / std } else { 0.0 }
    }
}

/// Running record of closed trades and equity.
///
/// Only aggregates are kept, so memory stays constant however long the
/// bot runs and each update is O(1).
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    trades: usize,
    wins: usize,
    returns: ReturnStats,
    /// Losing (or flat) trades since the last win.
    loss_streak: u32,
    /// UTC day of the most recent closed trade and the P&L booked on it.
    day: Option<NaiveDate>,
    day_pnl: Decimal,
    peak_equity: Decimal,
    current_equity: Decimal,
    max_drawdown_pct: f64,
}

impl PerformanceTracker {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            trades: 0,
            wins: 0,
            returns: ReturnStats::default(),
            loss_streak: 0,
            day: None,
            day_pnl: Decimal::ZERO,
            peak_equity: initial_equity,
            current_equity: initial_equity,
            max_drawdown_pct: 0.0,
        }
    }

    /// Record a closed trade. Open trades are ignored.
    pub fn record_trade(&mut self, trade: &SimTrade) {
        let (Some(pnl), Some(closed_at)) = (trade.pnl, trade.closed_at) else {
            return;
        };
        self.trades += 1;
        self.returns.push(trade.return_pct.unwrap_or(0.0));
        if pnl > Decimal::ZERO {
            self.wins += 1;
            self.loss_streak = 0;
        } else {
            self.loss_streak += 1;
        }

        let day = closed_at.date_naive();
        if self.day == Some(day) {
            self.day_pnl += pnl;
        } else {
            self.day = Some(day);
            self.day_pnl = pnl;
        }
    }

    pub fn record_equity(&mut self, _at: DateTime<Utc>, equity: Decimal) {
        self.current_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > Decimal::ZERO {
            let dd = ((self.peak_equity - equity) / self.peak_equity * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0);
            self.max_drawdown_pct = self.max_drawdown_pct.max(dd);
        }
    }

    pub fn trade_count(&self) -> usize {
        self.trades
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            total_trades: self.trades,
            win_rate: if self.trades > 0 {
                self.wins as f64 / self.trades as f64
            } else {
                0.0
            },
            avg_return_pct: self.returns.mean(),
            max_drawdown_pct: self.max_drawdown_pct,
            sharpe_ratio: self.returns.sharpe(),
            consecutive_losses: self.loss_streak,
            daily_loss_pct: self.daily_loss_pct(),
            peak_equity: self.peak_equity,
            current_equity: self.current_equity,
        }
    }

    fn daily_loss_pct(&self) -> f64 {
        if self.day.is_none() || self.day_pnl >= Decimal::ZERO {
            return 0.0;
        }
        let day_open = self.current_equity - self.day_pnl;
        if day_open <= Decimal::ZERO {
            return 100.0;
        }
        (-self.day_pnl / day_open * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }
}

/// Persisted metrics document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsFile {
    /// "execute" or "decide".
    pub mode: String,
    /// Cycles started, counted before the fetch. Includes the cycle that
    /// found the data source exhausted and the one that tripped a halt.
    pub cycle_count: u64,
    /// Executions dispatched this run: every cycle that ended `Executed`,
    /// entries and Exit/Reduce closes alike. Closed round trips live in
    /// `trading_summary.total_trades`.
    pub total_trades: usize,
    pub blocked_count: u64,
    pub last_updated: DateTime<Utc>,
    pub trading_summary: TradingSummary,
    #[serde(default)]
    pub circuit_breaker_triggered: bool,
    #[serde(default)]
    pub halt_reason: Option<String>,
    #[serde(default)]
    pub performance: PerformanceMetrics,
}

/// Writes the metrics file with a temp-file + rename swap.
#[derive(Debug, Clone)]
pub struct MetricsWriter {
    path: PathBuf,
}

impl MetricsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, metrics: &MetricsFile) -> Result<(), MetricsError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| MetricsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_vec_pretty(metrics)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| MetricsError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| MetricsError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), cycle = metrics.cycle_count, "Metrics written");
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<MetricsFile, MetricsError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| MetricsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Result of a health check against a metrics file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Healthy iff the file exists, parses, carries `mode`, and the circuit
/// breaker has not triggered.
pub fn check_health(path: impl AsRef<Path>) -> HealthStatus {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            return HealthStatus::Unhealthy(format!(
                "cannot read metrics file {}: {}",
                path.display(),
                e
            ));
        }
    };
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => return HealthStatus::Unhealthy(format!("unparseable metrics file: {}", e)),
    };
    if value.get("mode").is_none() {
        return HealthStatus::Unhealthy("metrics file has no mode".to_string());
    }
    if value
        .get("circuit_breaker_triggered")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        let reason = value
            .get("halt_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        return HealthStatus::Unhealthy(format!("circuit breaker triggered: {}", reason));
    }
    HealthStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use accum_common::{ActionKind, Side};
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn closed(pnl: Decimal, closed_at: DateTime<Utc>) -> SimTrade {
        SimTrade {
            id: "paper-1".to_string(),
            symbol: "SOL".to_string(),
            kind: ActionKind::Long,
            side: Side::Buy,
            entry_price: dec!(100),
            notional: dec!(100),
            leverage: dec!(1),
            entry_fee: Decimal::ZERO,
            exit_fee: Decimal::ZERO,
            slippage_bps: 0.0,
            is_closed: true,
            exit_price: Some(dec!(100)),
            pnl: Some(pnl),
            return_pct: pnl.to_f64(),
            opened_at: closed_at,
            closed_at: Some(closed_at),
        }
    }

    fn summary() -> TradingSummary {
        TradingSummary {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            return_pct: 0.0,
            current_capital: dec!(1000),
            initial_capital: dec!(1000),
            open_positions: 0,
        }
    }

    fn file(triggered: bool) -> MetricsFile {
        MetricsFile {
            mode: "decide".to_string(),
            cycle_count: 3,
            total_trades: 0,
            blocked_count: 1,
            last_updated: Utc::now(),
            trading_summary: summary(),
            circuit_breaker_triggered: triggered,
            halt_reason: triggered.then(|| "max drawdown".to_string()),
            performance: PerformanceMetrics::default(),
        }
    }

    #[test]
    fn test_drawdown_from_peak() {
        let mut tracker = PerformanceTracker::new(dec!(1000));
        let now = Utc::now();
        tracker.record_equity(now, dec!(1200));
        tracker.record_equity(now, dec!(900));
        tracker.record_equity(now, dec!(1100));
        let m = tracker.metrics();
        assert_eq!(m.peak_equity, dec!(1200));
        assert!((m.max_drawdown_pct - 25.0).abs() < 1e-9);
        assert_eq!(m.current_equity, dec!(1100));
    }

    #[test]
    fn test_trade_statistics() {
        let mut tracker = PerformanceTracker::new(dec!(1000));
        let now = Utc::now();
        tracker.record_trade(&closed(dec!(10), now));
        tracker.record_trade(&closed(dec!(-5), now));
        tracker.record_trade(&closed(dec!(-5), now));
        tracker.record_equity(now, dec!(1000));

        let m = tracker.metrics();
        assert_eq!(m.total_trades, 3);
        assert!((m.win_rate - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.consecutive_losses, 2);
        assert!(m.avg_return_pct.abs() < 1e-12);
        // Net flat day
        assert_eq!(m.daily_loss_pct, 0.0);
    }

    #[test]
    fn test_daily_loss_uses_last_trade_day() {
        let mut tracker = PerformanceTracker::new(dec!(1000));
        let now = Utc::now();
        tracker.record_trade(&closed(dec!(-500), now - ChronoDuration::days(2)));
        tracker.record_trade(&closed(dec!(-50), now));
        tracker.record_equity(now, dec!(450));
        let m = tracker.metrics();
        // 50 lost from an opening equity of 500
        assert!((m.daily_loss_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_trades_ignored() {
        let mut tracker = PerformanceTracker::new(dec!(1000));
        let mut trade = closed(dec!(1), Utc::now());
        trade.pnl = None;
        tracker.record_trade(&trade);
        assert_eq!(tracker.trade_count(), 0);
    }

    fn sharpe(returns: &[f64]) -> f64 {
        let mut stats = ReturnStats::default();
        for r in returns {
            stats.push(*r);
        }
        stats.sharpe()
    }

    #[test]
    fn test_sharpe_needs_dispersion() {
        assert_eq!(sharpe(&[1.0]), 0.0);
        assert_eq!(sharpe(&[1.0, 1.0, 1.0]), 0.0);
        // mean 2, sample std 1
        assert!((sharpe(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_long_equity_history_matches_batch_drawdown() {
        let mut tracker = PerformanceTracker::new(dec!(1000));
        let now = Utc::now();
        let mut peak = dec!(1000);
        let mut worst = 0.0_f64;
        for i in 0..100_000u32 {
            let equity = dec!(1000) + Decimal::from(i % 500) - Decimal::from(i / 1000);
            tracker.record_equity(now, equity);
            peak = peak.max(equity);
            let dd = ((peak - equity) / peak * Decimal::ONE_HUNDRED).to_f64().unwrap();
            worst = worst.max(dd);
        }
        let m = tracker.metrics();
        assert_eq!(m.peak_equity, peak);
        assert!((m.max_drawdown_pct - worst).abs() < 1e-9);
        assert_eq!(m.current_equity, dec!(1000) + dec!(499) - dec!(99));
    }

    #[test]
    fn test_win_resets_loss_streak() {
        let mut tracker = PerformanceTracker::new(dec!(1000));
        let now = Utc::now();
        tracker.record_trade(&closed(dec!(-1), now));
        tracker.record_trade(&closed(dec!(-1), now));
        tracker.record_trade(&closed(dec!(2), now));
        tracker.record_trade(&closed(dec!(0), now));
        assert_eq!(tracker.metrics().consecutive_losses, 1);
        assert_eq!(tracker.trade_count(), 4);
    }

    #[test]
    fn test_write_and_check_health() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.json");
        let writer = MetricsWriter::new(&path);

        assert!(!check_health(&path).is_healthy());

        writer.write(&file(false)).unwrap();
        assert_eq!(check_health(&path), HealthStatus::Healthy);
        assert_eq!(MetricsWriter::read(&path).unwrap().cycle_count, 3);
        assert!(!path.with_extension("json.tmp").exists());

        writer.write(&file(true)).unwrap();
        match check_health(&path) {
            HealthStatus::Unhealthy(reason) => assert!(reason.contains("max drawdown")),
            HealthStatus::Healthy => panic!("tripped breaker reported healthy"),
        }
    }

    #[test]
    fn test_health_rejects_garbage_and_missing_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        fs::write(&path, "not json").unwrap();
        assert!(!check_health(&path).is_healthy());
        fs::write(&path, r#"{"cycle_count": 1}"#).unwrap();
        assert!(!check_health(&path).is_healthy());
        fs::write(&path, r#"{"mode": "decide"}"#).unwrap();
        assert!(check_health(&path).is_healthy());
    }
}
