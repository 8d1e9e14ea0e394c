//! Seeded in-process market and quote stand-ins.
//!
//! Both take an explicit seed so paper runs and tests are reproducible.

use std::collections::{HashMap, VecDeque};

use accum_common::{MarketState, Side};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::ema::{EmaConfig, EmaTracker};
use crate::fetcher::{MarketDataError, MarketDataFetcher};
use crate::quote::{Quote, QuoteError, QuoteProvider};

/// Parameters of the random-walk market.
#[derive(Debug, Clone)]
pub struct MockMarketConfig {
    pub initial_price: Decimal,
    /// Largest per-fetch relative move (0.005 = 0.5%).
    pub max_step: f64,
    pub volume_range: (f64, f64),
    /// Spread as a percentage of price.
    pub spread_pct_range: (f64, f64),
    pub liquidity_range: (f64, f64),
    pub mev_range: (f64, f64),
    pub latency_ms_range: (f64, f64),
    /// Returns kept for the rolling volatility estimate.
    pub volatility_window: usize,
    pub seed: u64,
}

impl Default for MockMarketConfig {
    fn default() -> Self {
        Self {
            initial_price: Decimal::ONE_HUNDRED,
            max_step: 0.005,
            volume_range: (5_000.0, 15_000.0),
            spread_pct_range: (0.01, 0.1),
            liquidity_range: (0.6, 1.0),
            mev_range: (0.0, 0.5),
            latency_ms_range: (50.0, 200.0),
            volatility_window: 20,
            seed: 42,
        }
    }
}

struct WalkState {
    rng: StdRng,
    prices: HashMap<String, Decimal>,
    returns: HashMap<String, VecDeque<f64>>,
    trackers: HashMap<String, EmaTracker>,
}

/// Random-walk market data source.
pub struct MockMarketData {
    config: MockMarketConfig,
    state: Mutex<WalkState>,
}

impl MockMarketData {
    pub fn new(config: MockMarketConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            state: Mutex::new(WalkState {
                rng,
                prices: HashMap::new(),
                returns: HashMap::new(),
                trackers: HashMap::new(),
            }),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(MockMarketConfig {
            seed,
            ..Default::default()
        })
    }

    fn next_snapshot(&self, symbol: &str) -> MarketState {
        let cfg = &self.config;
        let mut guard = self.state.lock();
        let walk = &mut *guard;

        let max_step = if cfg.max_step.is_finite() {
            cfg.max_step.abs()
        } else {
            0.0
        };
        let step = walk.rng.gen_range(-max_step..=max_step);
        let prev = walk
            .prices
            .get(symbol)
            .copied()
            .unwrap_or(cfg.initial_price);
        let factor = Decimal::from_f64(1.0 + step).unwrap_or(Decimal::ONE);
        let price = (prev * factor).max(Decimal::new(1, 4));
        walk.prices.insert(symbol.to_string(), price);

        let window = walk.returns.entry(symbol.to_string()).or_default();
        window.push_back(step);
        while window.len() > cfg.volatility_window.max(1) {
            window.pop_front();
        }
        let volatility = std_dev(window);

        let spread_pct = sample(&mut walk.rng, cfg.spread_pct_range);
        let half_spread = Decimal::from_f64(spread_pct / 200.0).unwrap_or(Decimal::ZERO);
        let volume = sample(&mut walk.rng, cfg.volume_range);
        let liquidity = sample(&mut walk.rng, cfg.liquidity_range);

        let mut state = MarketState::new(symbol, price);
        state.timestamp = Utc::now();
        state.bid = price * (Decimal::ONE - half_spread);
        state.ask = price * (Decimal::ONE + half_spread);
        state.spread_bps = spread_pct * 100.0;
        state.volume_24h = Decimal::from_f64(volume).unwrap_or(Decimal::ZERO);
        state.volatility = volatility;
        state.liquidity_score = liquidity.clamp(0.0, 1.0);
        state.liquidity_depth = Decimal::from_f64(volume * liquidity).unwrap_or(Decimal::ZERO);
        state.mev_risk_score = sample(&mut walk.rng, cfg.mev_range).clamp(0.0, 1.0);
        state.latency_ms = sample(&mut walk.rng, cfg.latency_ms_range);

        walk.trackers
            .entry(symbol.to_string())
            .or_insert_with(|| EmaTracker::new(EmaConfig::default()))
            .apply(&mut state);
        state
    }
}

#[async_trait]
impl MarketDataFetcher for MockMarketData {
    async fn fetch(&self, symbol: &str) -> Result<MarketState, MarketDataError> {
        let state = self.next_snapshot(symbol);
        state.validate()?;
        Ok(state)
    }
}

fn sample(rng: &mut StdRng, (lo, hi): (f64, f64)) -> f64 {
    if hi <= lo {
        return lo;
    }
    rng.gen_range(lo..hi)
}

fn std_dev(values: &VecDeque<f64>) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Deterministic quote stub around a settable reference price.
///
/// `slippage_bps = base_slippage_bps + impact_bps_per_1k * notional / 1000`.
pub struct MockQuoteProvider {
    reference: Mutex<HashMap<String, Decimal>>,
    default_price: Decimal,
    pub base_slippage_bps: f64,
    pub impact_bps_per_1k: f64,
    pub fee_rate: Decimal,
}

impl MockQuoteProvider {
    pub fn new(default_price: Decimal) -> Self {
        Self {
            reference: Mutex::new(HashMap::new()),
            default_price,
            base_slippage_bps: 5.0,
            impact_bps_per_1k: 1.0,
            fee_rate: Decimal::new(5, 4),
        }
    }

    /// Update the reference price for a symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.reference.lock().insert(symbol.to_string(), price);
    }

    pub fn with_slippage(mut self, base_bps: f64, impact_bps_per_1k: f64) -> Self {
        self.base_slippage_bps = base_bps;
        self.impact_bps_per_1k = impact_bps_per_1k;
        self
    }
}

#[async_trait]
impl QuoteProvider for MockQuoteProvider {
    async fn get_quote(
        &self,
        symbol: &str,
        notional: Decimal,
        side: Side,
    ) -> Result<Quote, QuoteError> {
        if notional <= Decimal::ZERO {
            return Err(QuoteError::InvalidNotional(notional));
        }
        let reference = self
            .reference
            .lock()
            .get(symbol)
            .copied()
            .unwrap_or(self.default_price);
        let thousands = (notional / Decimal::ONE_THOUSAND).to_f64().unwrap_or(0.0);
        let slippage_bps = self.base_slippage_bps + self.impact_bps_per_1k * thousands;
        let slip = Decimal::from_f64(slippage_bps / 10_000.0).unwrap_or(Decimal::ZERO);
        let price = match side {
            Side::Buy => reference * (Decimal::ONE + slip),
            Side::Sell => reference * (Decimal::ONE - slip),
        };
        Ok(Quote {
            price,
            slippage_bps,
            fee: notional * self.fee_rate,
            is_fallback: false,
        })
    }
}
