//! Market snapshot types.
//!
//! A `MarketState` is produced once per cycle by a market data fetcher and is
//! read-only to everything downstream. It carries both moving-average pairs
//! (short/long and fast/slow) and the regime derived from them, so no consumer
//! has to re-derive the regime on its own.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a snapshot or action carries out-of-range values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: String },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: String },

    #[error("Crossed quote: bid={bid} > ask={ask}")]
    CrossedQuote { bid: Decimal, ask: Decimal },

    #[error("{field} out of range [{min}, {max}]: {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("Empty symbol")]
    EmptySymbol,
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market regime derived from the fast/slow moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    #[default]
    Unknown,
}

impl MarketRegime {
    /// All regimes in a stable order, used for state bucketing.
    pub const ALL: [MarketRegime; 5] = [
        MarketRegime::TrendingUp,
        MarketRegime::TrendingDown,
        MarketRegime::Ranging,
        MarketRegime::Volatile,
        MarketRegime::Unknown,
    ];

    /// Stable index of this regime in [`MarketRegime::ALL`].
    pub fn index(&self) -> usize {
        match self {
            MarketRegime::TrendingUp => 0,
            MarketRegime::TrendingDown => 1,
            MarketRegime::Ranging => 2,
            MarketRegime::Volatile => 3,
            MarketRegime::Unknown => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::TrendingUp => "trending_up",
            MarketRegime::TrendingDown => "trending_down",
            MarketRegime::Ranging => "ranging",
            MarketRegime::Volatile => "volatile",
            MarketRegime::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable per-fetch snapshot of market conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,

    /// Last traded / mid price.
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume_24h: Decimal,

    /// Short and long moving averages (price-jump and divergence checks).
    #[serde(default)]
    pub ema_short: Option<Decimal>,
    #[serde(default)]
    pub ema_long: Option<Decimal>,
    /// Fast and slow moving averages (regime derivation).
    #[serde(default)]
    pub ema_fast: Option<Decimal>,
    #[serde(default)]
    pub ema_slow: Option<Decimal>,
    #[serde(default)]
    pub regime: MarketRegime,

    /// Realized volatility as a fraction (0.02 = 2%).
    #[serde(default)]
    pub volatility: f64,
    #[serde(default)]
    pub spread_bps: f64,
    /// Estimated front-running risk, 0-1.
    #[serde(default)]
    pub mev_risk_score: f64,
    /// Round-trip latency estimate in milliseconds.
    #[serde(default)]
    pub latency_ms: f64,
    /// Normalized liquidity score, 0-1. Absent means fully liquid.
    #[serde(default = "full_liquidity")]
    pub liquidity_score: f64,
    /// Quote-currency depth near the touch.
    #[serde(default)]
    pub liquidity_depth: Decimal,
}

fn full_liquidity() -> f64 {
    1.0
}

impl MarketState {
    /// Create a flat snapshot at `price` with a zero-width quote.
    ///
    /// Risk metrics start at zero, liquidity at 1 and the regime at
    /// `Unknown`; callers fill in the rest through the public fields.
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.into(),
            price,
            bid: price,
            ask: price,
            volume_24h: Decimal::ZERO,
            ema_short: None,
            ema_long: None,
            ema_fast: None,
            ema_slow: None,
            regime: MarketRegime::Unknown,
            volatility: 0.0,
            spread_bps: 0.0,
            mev_risk_score: 0.0,
            latency_ms: 0.0,
            liquidity_score: 1.0,
            liquidity_depth: Decimal::ZERO,
        }
    }

    /// Mid price between bid and ask.
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Bid-ask spread as a percentage of the bid.
    pub fn spread_pct(&self) -> f64 {
        if self.bid <= Decimal::ZERO {
            return 0.0;
        }
        ((self.ask - self.bid) / self.bid * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Check every range invariant of the snapshot.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        positive("price", self.price)?;
        positive("bid", self.bid)?;
        positive("ask", self.ask)?;
        if self.ask < self.bid {
            return Err(ValidationError::CrossedQuote {
                bid: self.bid,
                ask: self.ask,
            });
        }
        if self.volume_24h < Decimal::ZERO {
            return Err(ValidationError::Negative {
                field: "volume_24h",
                value: self.volume_24h.to_string(),
            });
        }
        if self.liquidity_depth < Decimal::ZERO {
            return Err(ValidationError::Negative {
                field: "liquidity_depth",
                value: self.liquidity_depth.to_string(),
            });
        }
        for (field, ema) in [
            ("ema_short", self.ema_short),
            ("ema_long", self.ema_long),
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
        ] {
            if let Some(value) = ema {
                positive(field, value)?;
            }
        }
        non_negative("volatility", self.volatility)?;
        non_negative("spread_bps", self.spread_bps)?;
        non_negative("latency_ms", self.latency_ms)?;
        unit_interval("mev_risk_score", self.mev_risk_score)?;
        unit_interval("liquidity_score", self.liquidity_score)?;
        Ok(())
    }
}

fn positive(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::NonPositive {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn unit_interval(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}
