//! Exponential moving averages and regime classification.
//!
//! The fetcher derives both EMA pairs and the regime once per snapshot so
//! downstream components read them as plain fields.

use accum_common::{MarketRegime, MarketState};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// Smoothing factors and regime thresholds.
#[derive(Debug, Clone)]
pub struct EmaConfig {
    pub short_alpha: f64,
    pub long_alpha: f64,
    pub fast_alpha: f64,
    pub slow_alpha: f64,
    /// Fast above slow by this ratio means trending up (1.02 = 2%).
    pub trend_band: f64,
    /// Volatility at or above this is classified `Volatile`.
    pub volatile_threshold: f64,
    /// Samples required before a regime other than `Unknown` is reported.
    pub warmup: u32,
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self {
            short_alpha: 2.0 / 6.0,  // ~5 periods
            long_alpha: 2.0 / 21.0,  // ~20 periods
            fast_alpha: 0.2,         // ~9 periods
            slow_alpha: 0.067,       // ~29 periods
            trend_band: 1.02,
            volatile_threshold: 0.05,
            warmup: 3,
        }
    }
}

/// Current averages after an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaReading {
    pub short: Decimal,
    pub long: Decimal,
    pub fast: Decimal,
    pub slow: Decimal,
}

/// Running EMA state for one symbol.
#[derive(Debug, Clone)]
pub struct EmaTracker {
    config: EmaConfig,
    reading: Option<EmaReading>,
    samples: u32,
}

impl EmaTracker {
    pub fn new(config: EmaConfig) -> Self {
        Self {
            config,
            reading: None,
            samples: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EmaConfig::default())
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn reading(&self) -> Option<EmaReading> {
        self.reading
    }

    /// Fold a new price into every average. The first price seeds all four.
    pub fn update(&mut self, price: Decimal) -> EmaReading {
        let next = match self.reading {
            None => EmaReading {
                short: price,
                long: price,
                fast: price,
                slow: price,
            },
            Some(prev) => EmaReading {
                short: ema_step(prev.short, price, self.config.short_alpha),
                long: ema_step(prev.long, price, self.config.long_alpha),
                fast: ema_step(prev.fast, price, self.config.fast_alpha),
                slow: ema_step(prev.slow, price, self.config.slow_alpha),
            },
        };
        self.reading = Some(next);
        self.samples = self.samples.saturating_add(1);
        next
    }

    /// Classify the regime from the fast/slow pair and volatility.
    pub fn regime(&self, volatility: f64) -> MarketRegime {
        let Some(reading) = self.reading else {
            return MarketRegime::Unknown;
        };
        if self.samples < self.config.warmup {
            return MarketRegime::Unknown;
        }
        if volatility >= self.config.volatile_threshold {
            return MarketRegime::Volatile;
        }
        classify_trend(reading.fast, reading.slow, self.config.trend_band)
    }

    /// Update from the snapshot's price and fill in any missing averages
    /// and an `Unknown` regime.
    pub fn apply(&mut self, state: &mut MarketState) {
        let reading = self.update(state.price);
        state.ema_short.get_or_insert(reading.short);
        state.ema_long.get_or_insert(reading.long);
        state.ema_fast.get_or_insert(reading.fast);
        state.ema_slow.get_or_insert(reading.slow);
        if state.regime == MarketRegime::Unknown {
            state.regime = self.regime(state.volatility);
        }
    }
}

/// Trending when fast sits outside `slow × [1/band, band]`.
pub fn classify_trend(fast: Decimal, slow: Decimal, band: f64) -> MarketRegime {
    let upper = Decimal::from_f64(band).unwrap_or(Decimal::ONE);
    let lower = Decimal::from_f64(2.0 - band).unwrap_or(Decimal::ONE);
    if fast > slow * upper {
        MarketRegime::TrendingUp
    } else if fast < slow * lower {
        MarketRegime::TrendingDown
    } else {
        MarketRegime::Ranging
    }
}

fn ema_step(prev: Decimal, price: Decimal, alpha: f64) -> Decimal {
    let alpha = Decimal::from_f64(alpha).unwrap_or(Decimal::ZERO);
    alpha * price + (Decimal::ONE - alpha) * prev
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_first_price_seeds_all_averages() {
        let mut tracker = EmaTracker::with_defaults();
        let reading = tracker.update(dec!(100));
        assert_eq!(reading.short, dec!(100));
        assert_eq!(reading.slow, dec!(100));
        assert_eq!(tracker.regime(0.0), MarketRegime::Unknown);
    }

    #[test]
    fn test_rising_prices_trend_up() {
        let mut tracker = EmaTracker::with_defaults();
        let mut price = dec!(100);
        for _ in 0..20 {
            tracker.update(price);
            price *= dec!(1.02);
        }
        let reading = tracker.reading().unwrap();
        assert!(reading.fast > reading.slow);
        assert!(reading.short > reading.long);
        assert_eq!(tracker.regime(0.01), MarketRegime::TrendingUp);
        assert_eq!(tracker.regime(0.08), MarketRegime::Volatile);
    }

    #[test]
    fn test_classify_trend_band() {
        assert_eq!(
            classify_trend(dec!(103), dec!(100), 1.02),
            MarketRegime::TrendingUp
        );
        assert_eq!(
            classify_trend(dec!(97), dec!(100), 1.02),
            MarketRegime::TrendingDown
        );
        assert_eq!(
            classify_trend(dec!(101), dec!(100), 1.02),
            MarketRegime::Ranging
        );
    }

    #[test]
    fn test_apply_keeps_existing_fields() {
        let mut tracker = EmaTracker::with_defaults();
        let mut state = MarketState::new("SOL", dec!(100));
        state.ema_short = Some(dec!(99));
        state.regime = MarketRegime::Ranging;
        tracker.apply(&mut state);
        assert_eq!(state.ema_short, Some(dec!(99)));
        assert_eq!(state.ema_long, Some(dec!(100)));
        assert_eq!(state.regime, MarketRegime::Ranging);
    }
}
