//! Loss-limit circuit breaker.
//!
//! Trips when any of these limits is breached:
//! - max drawdown percent (strictly greater than the limit)
//! - daily loss percent (strictly greater than the limit)
//! - consecutive losing trades (reaching the limit)
//!
//! Once tripped it stays open until `reset()`; there is no auto-reset since
//! a tripped breaker ends the run.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::PerformanceMetrics;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum peak-to-trough drawdown, in percent.
    pub max_drawdown_pct: f64,

    /// Maximum loss on the current UTC day, in percent.
    pub max_daily_loss_pct: f64,

    /// Consecutive losing trades that trip the breaker.
    pub max_consecutive_losses: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 20.0,
            max_daily_loss_pct: 10.0,
            max_consecutive_losses: 5,
        }
    }
}

/// Which limit tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripKind {
    MaxDrawdown,
    DailyLoss,
    ConsecutiveLosses,
}

impl TripKind {
    pub fn code(&self) -> &'static str {
        match self {
            TripKind::MaxDrawdown => "MAX_DRAWDOWN",
            TripKind::DailyLoss => "DAILY_LOSS",
            TripKind::ConsecutiveLosses => "CONSECUTIVE_LOSSES",
        }
    }
}

/// Reason why the circuit breaker tripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripReason {
    pub kind: TripKind,

    /// Observed value at the trip.
    pub value: f64,

    /// Configured limit.
    pub limit: f64,

    pub tripped_at: DateTime<Utc>,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TripKind::MaxDrawdown => write!(
                f,
                "Max drawdown {:.2}% exceeds limit {:.2}%",
                self.value, self.limit
            ),
            TripKind::DailyLoss => write!(
                f,
                "Daily loss {:.2}% exceeds limit {:.2}%",
                self.value, self.limit
            ),
            TripKind::ConsecutiveLosses => write!(
                f,
                "{} consecutive losses reached limit {}",
                self.value as u32, self.limit as u32
            ),
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub tripped: bool,

    /// Number of checks performed.
    pub total_checks: u64,

    /// Total number of trips.
    pub total_trips: u32,

    pub last_trip_reason: Option<TripReason>,
}

/// Loss-limit circuit breaker.
pub struct CircuitBreaker {
    /// Configuration.
    config: CircuitBreakerConfig,

    /// Whether the circuit breaker is tripped (open).
    tripped: AtomicBool,

    /// Total number of checks.
    total_checks: AtomicU64,

    /// Total number of times the circuit breaker has tripped.
    total_trips: AtomicU32,

    /// Reason for the current trip.
    last_reason: Mutex<Option<TripReason>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("tripped", &self.tripped.load(Ordering::Relaxed))
            .field("total_trips", &self.total_trips.load(Ordering::Relaxed))
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            tripped: AtomicBool::new(false),
            total_checks: AtomicU64::new(0),
            total_trips: AtomicU32::new(0),
            last_reason: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Reason for the current trip, if tripped.
    pub fn trip_reason(&self) -> Option<TripReason> {
        self.last_reason.lock().clone()
    }

    fn breach(&self, metrics: &PerformanceMetrics) -> Option<(TripKind, f64, f64)> {
        if metrics.max_drawdown_pct > self.config.max_drawdown_pct {
            return Some((
                TripKind::MaxDrawdown,
                metrics.max_drawdown_pct,
                self.config.max_drawdown_pct,
            ));
        }
        if metrics.daily_loss_pct > self.config.max_daily_loss_pct {
            return Some((
                TripKind::DailyLoss,
                metrics.daily_loss_pct,
                self.config.max_daily_loss_pct,
            ));
        }
        if self.config.max_consecutive_losses > 0
            && metrics.consecutive_losses >= self.config.max_consecutive_losses
        {
            return Some((
                TripKind::ConsecutiveLosses,
                metrics.consecutive_losses as f64,
                self.config.max_consecutive_losses as f64,
            ));
        }
        None
    }

    /// Check the limits against current metrics.
    ///
    /// Returns the trip reason when the breaker is (or becomes) tripped.
    pub fn check(&self, metrics: &PerformanceMetrics) -> Option<TripReason> {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        if self.is_tripped() {
            return self.trip_reason();
        }

        let (kind, value, limit) = self.breach(metrics)?;
        let reason = TripReason {
            kind,
            value,
            limit,
            tripped_at: Utc::now(),
        };
        self.trip(reason.clone());
        Some(reason)
    }

    fn trip(&self, reason: TripReason) {
        if !self.tripped.swap(true, Ordering::AcqRel) {
            self.total_trips.fetch_add(1, Ordering::Relaxed);
        }
        warn!(
            kind = reason.kind.code(),
            value = reason.value,
            limit = reason.limit,
            "Circuit breaker tripped: {}",
            reason
        );
        *self.last_reason.lock() = Some(reason);
    }

    /// Manually reset the circuit breaker.
    pub fn reset(&self) {
        self.tripped.store(false, Ordering::Release);
        *self.last_reason.lock() = None;
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            tripped: self.is_tripped(),
            total_checks: self.total_checks.load(Ordering::Relaxed),
            total_trips: self.total_trips.load(Ordering::Relaxed),
            last_trip_reason: self.trip_reason(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_defaults()
    }
}
