//! Market data and quote collaborators for the accumulation bot.
//!
//! The decision pipeline only sees two capabilities:
//! - [`MarketDataFetcher`]: one validated `MarketState` per call
//! - [`QuoteProvider`]: a price/slippage/fee quote for a notional
//!
//! Everything in this crate is in-process. Live venue adapters would
//! implement the same traits.
//!
//! ## Modules
//!
//! - `fetcher`: fetcher trait, cache, composite fallback and replay
//! - `ema`: moving-average and regime derivation
//! - `mock`: seeded random-walk market and deterministic quote stub
//! - `quote`: quote trait and retry-with-fallback wrapper

pub mod ema;
pub mod fetcher;
pub mod mock;
pub mod quote;

pub use ema::{EmaConfig, EmaReading, EmaTracker};
pub use fetcher::{
    CachedFetcher, CompositeFetcher, MarketDataError, MarketDataFetcher, MarketMetrics,
    MetricsSource, ReplayFetcher,
};
pub use mock::{MockMarketConfig, MockMarketData, MockQuoteProvider};
pub use quote::{Quote, QuoteError, QuoteProvider, RetryConfig, RetryingQuoteProvider};
