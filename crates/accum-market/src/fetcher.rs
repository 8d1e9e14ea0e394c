//! Market data fetcher abstraction.
//!
//! The `MarketDataFetcher` trait hides where snapshots come from. The cycle
//! orchestrator works the same against:
//! - `MockMarketData` for paper runs
//! - `ReplayFetcher` for recorded sequences (backtests, tests)
//! - any live adapter implementing the trait
//!
//! `CachedFetcher` and `CompositeFetcher` wrap another fetcher to add a
//! short-lived cache and fallback metrics respectively.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use accum_common::{MarketState, ValidationError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ema::EmaTracker;

/// Errors that can occur while fetching market data.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid snapshot: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Replay exhausted after {0} snapshots")]
    Exhausted(usize),

    #[error("Timeout")]
    Timeout,
}

/// Source of market snapshots.
#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    /// Fetch the current snapshot for `symbol`.
    async fn fetch(&self, symbol: &str) -> Result<MarketState, MarketDataError>;
}

#[async_trait]
impl<T: MarketDataFetcher + ?Sized> MarketDataFetcher for Arc<T> {
    async fn fetch(&self, symbol: &str) -> Result<MarketState, MarketDataError> {
        (**self).fetch(symbol).await
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Wraps a fetcher with a per-symbol time-to-live cache.
pub struct CachedFetcher<F> {
    inner: F,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, MarketState)>>,
}

impl<F: MarketDataFetcher> CachedFetcher<F> {
    pub fn new(inner: F, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached snapshot.
    pub fn invalidate(&self) {
        self.cache.lock().clear();
    }
}

#[async_trait]
impl<F: MarketDataFetcher> MarketDataFetcher for CachedFetcher<F> {
    async fn fetch(&self, symbol: &str) -> Result<MarketState, MarketDataError> {
        let cached = self
            .cache
            .lock()
            .get(symbol)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, state)| state.clone());
        if let Some(state) = cached {
            debug!(symbol, "Serving cached snapshot");
            return Ok(state);
        }

        let state = self.inner.fetch(symbol).await?;
        self.cache
            .lock()
            .insert(symbol.to_string(), (Instant::now(), state.clone()));
        Ok(state)
    }
}

// ============================================================================
// Composite with fallback metrics
// ============================================================================

/// Secondary metrics that a price-only source cannot supply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMetrics {
    pub volume_24h: Decimal,
    pub liquidity_score: f64,
    pub volatility: f64,
    pub mev_risk_score: f64,
    pub latency_ms: f64,
}

impl MarketMetrics {
    /// Conservative values used when the metrics source is down.
    pub fn conservative() -> Self {
        Self {
            volume_24h: Decimal::from(1_000_000_000u64),
            liquidity_score: 0.5,
            volatility: 0.02,
            mev_risk_score: 0.3,
            latency_ms: 150.0,
        }
    }
}

/// Source of volume/liquidity/risk metrics for a symbol.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn metrics(&self, symbol: &str) -> Result<MarketMetrics, MarketDataError>;
}

/// Combines a price source with a secondary metrics source.
///
/// A failing metrics source never fails the fetch: conservative metrics are
/// substituted and a warning is logged.
pub struct CompositeFetcher<F> {
    prices: F,
    metrics: Option<Arc<dyn MetricsSource>>,
}

impl<F: MarketDataFetcher> CompositeFetcher<F> {
    pub fn new(prices: F, metrics: Option<Arc<dyn MetricsSource>>) -> Self {
        Self { prices, metrics }
    }
}

#[async_trait]
impl<F: MarketDataFetcher> MarketDataFetcher for CompositeFetcher<F> {
    async fn fetch(&self, symbol: &str) -> Result<MarketState, MarketDataError> {
        let mut state = self.prices.fetch(symbol).await?;

        let metrics = match &self.metrics {
            Some(source) => match source.metrics(symbol).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(symbol, error = %e, "Metrics source failed, using conservative defaults");
                    MarketMetrics::conservative()
                }
            },
            None => MarketMetrics::conservative(),
        };

        state.volume_24h = metrics.volume_24h;
        state.liquidity_score = metrics.liquidity_score;
        state.volatility = metrics.volatility;
        state.mev_risk_score = metrics.mev_risk_score;
        state.latency_ms = metrics.latency_ms;
        state.validate()?;
        Ok(state)
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Serves a recorded sequence of snapshots in order.
///
/// Missing moving averages and `Unknown` regimes are derived on the way out,
/// so a recording of bare prices still yields complete snapshots.
pub struct ReplayFetcher {
    snapshots: Arc<Vec<MarketState>>,
    position: AtomicUsize,
    tracker: Mutex<EmaTracker>,
}

impl ReplayFetcher {
    /// Creates a replay over pre-loaded snapshots (chronological order).
    pub fn new(snapshots: Vec<MarketState>) -> Self {
        Self {
            snapshots: Arc::new(snapshots),
            position: AtomicUsize::new(0),
            tracker: Mutex::new(EmaTracker::with_defaults()),
        }
    }

    /// Load a JSON array of snapshots from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MarketDataError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MarketDataError::Unavailable(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let snapshots: Vec<MarketState> =
            serde_json::from_str(&content).map_err(|e| MarketDataError::Parse(e.to_string()))?;
        Ok(Self::new(snapshots))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.snapshots
            .len()
            .saturating_sub(self.position.load(Ordering::Acquire))
    }
}

#[async_trait]
impl MarketDataFetcher for ReplayFetcher {
    async fn fetch(&self, _symbol: &str) -> Result<MarketState, MarketDataError> {
        let index = self.position.fetch_add(1, Ordering::AcqRel);
        let Some(snapshot) = self.snapshots.get(index) else {
            return Err(MarketDataError::Exhausted(self.snapshots.len()));
        };
        let mut state = snapshot.clone();
        self.tracker.lock().apply(&mut state);
        state.validate()?;
        Ok(state)
    }
}
