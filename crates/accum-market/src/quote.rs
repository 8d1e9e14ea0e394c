//! Quote provider abstraction with retry and fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use accum_common::Side;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by a quote provider.
#[derive(Debug, Clone, Error)]
pub enum QuoteError {
    /// Temporary failure; worth retrying.
    #[error("Transient quote failure: {0}")]
    Transient(String),

    #[error("Quote unavailable for {symbol}: {reason}")]
    Unavailable { symbol: String, reason: String },

    #[error("Invalid notional: {0}")]
    InvalidNotional(Decimal),
}

/// A priced quote for a notional amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Expected average execution price.
    pub price: Decimal,
    /// Expected slippage versus the reference price, in basis points.
    pub slippage_bps: f64,
    /// Fee in quote currency.
    pub fee: Decimal,
    /// Set when this quote is a conservative stand-in, not a venue quote.
    #[serde(default)]
    pub is_fallback: bool,
}

/// Source of execution quotes.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn get_quote(
        &self,
        symbol: &str,
        notional: Decimal,
        side: Side,
    ) -> Result<Quote, QuoteError>;
}

#[async_trait]
impl<T: QuoteProvider + ?Sized> QuoteProvider for Arc<T> {
    async fn get_quote(
        &self,
        symbol: &str,
        notional: Decimal,
        side: Side,
    ) -> Result<Quote, QuoteError> {
        (**self).get_quote(symbol, notional, side).await
    }
}

/// Retry policy and the shape of the fallback quote.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_backoff * 2^n`.
    pub base_backoff: Duration,
    /// Slippage reported on fallback quotes.
    pub fallback_slippage_bps: f64,
    /// Fee rate applied to the notional on fallback quotes (0.001 = 0.1%).
    pub fallback_fee_rate: Decimal,
    /// Reference price used when no venue quote has ever succeeded.
    pub fallback_price: Option<Decimal>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(250),
            fallback_slippage_bps: 10.0,
            fallback_fee_rate: Decimal::new(1, 3),
            fallback_price: None,
        }
    }
}

/// Wraps a provider with exponential-backoff retries.
///
/// After the retries are exhausted a conservative fallback quote is
/// returned instead of the error, priced off the last good quote for the
/// symbol (or `fallback_price`). Only when neither exists does the error
/// propagate.
pub struct RetryingQuoteProvider<Q> {
    inner: Q,
    config: RetryConfig,
    last_price: Mutex<HashMap<String, Decimal>>,
}

impl<Q: QuoteProvider> RetryingQuoteProvider<Q> {
    pub fn new(inner: Q, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            last_price: Mutex::new(HashMap::new()),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    fn fallback_quote(&self, symbol: &str, notional: Decimal, side: Side) -> Option<Quote> {
        let reference = self
            .last_price
            .lock()
            .get(symbol)
            .copied()
            .or(self.config.fallback_price)?;
        let slip = Decimal::try_from(self.config.fallback_slippage_bps / 10_000.0)
            .unwrap_or(Decimal::ZERO);
        let price = match side {
            Side::Buy => reference * (Decimal::ONE + slip),
            Side::Sell => reference * (Decimal::ONE - slip),
        };
        Some(Quote {
            price,
            slippage_bps: self.config.fallback_slippage_bps,
            fee: notional * self.config.fallback_fee_rate,
            is_fallback: true,
        })
    }
}

#[async_trait]
impl<Q: QuoteProvider> QuoteProvider for RetryingQuoteProvider<Q> {
    async fn get_quote(
        &self,
        symbol: &str,
        notional: Decimal,
        side: Side,
    ) -> Result<Quote, QuoteError> {
        if notional <= Decimal::ZERO {
            return Err(QuoteError::InvalidNotional(notional));
        }

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let wait = self.backoff(attempt - 1);
                debug!(symbol, attempt, wait_ms = wait.as_millis() as u64, "Retrying quote");
                tokio::time::sleep(wait).await;
            }
            match self.inner.get_quote(symbol, notional, side).await {
                Ok(quote) => {
                    self.last_price.lock().insert(symbol.to_string(), quote.price);
                    return Ok(quote);
                }
                Err(QuoteError::InvalidNotional(n)) => return Err(QuoteError::InvalidNotional(n)),
                Err(e) => last_error = Some(e),
            }
        }

        let error = last_error.unwrap_or_else(|| QuoteError::Unavailable {
            symbol: symbol.to_string(),
            reason: "no attempts made".to_string(),
        });
        match self.fallback_quote(symbol, notional, side) {
            Some(quote) => {
                warn!(
                    symbol,
                    error = %error,
                    price = %quote.price,
                    "Quote retries exhausted, using fallback quote"
                );
                Ok(quote)
            }
            None => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then quotes at 100.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl QuoteProvider for FlakyProvider {
        async fn get_quote(
            &self,
            _symbol: &str,
            notional: Decimal,
            _side: Side,
        ) -> Result<Quote, QuoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(QuoteError::Transient("flaky".to_string()));
            }
            Ok(Quote {
                price: dec!(100),
                slippage_bps: 5.0,
                fee: notional * dec!(0.0005),
                is_fallback: false,
            })
        }
    }

    fn fast_retry(fallback_price: Option<Decimal>) -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
            fallback_price,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let provider = RetryingQuoteProvider::new(
            FlakyProvider {
                failures: 2,
                calls: AtomicU32::new(0),
            },
            fast_retry(None),
        );
        let quote = provider.get_quote("SOL", dec!(1000), Side::Buy).await.unwrap();
        assert!(!quote.is_fallback);
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fallback_after_exhausted_retries() {
        let provider = RetryingQuoteProvider::new(
            FlakyProvider {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            },
            fast_retry(Some(dec!(50))),
        );
        let quote = provider.get_quote("SOL", dec!(1000), Side::Buy).await.unwrap();
        assert!(quote.is_fallback);
        assert_eq!(quote.price, dec!(50.05));
        assert_eq!(quote.fee, dec!(1.000));
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 3);

        let quote = provider.get_quote("SOL", dec!(1000), Side::Sell).await.unwrap();
        assert_eq!(quote.price, dec!(49.95));
    }

    #[tokio::test]
    async fn test_no_reference_price_propagates_error() {
        let provider = RetryingQuoteProvider::new(
            FlakyProvider {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            },
            fast_retry(None),
        );
        assert!(matches!(
            provider.get_quote("SOL", dec!(1000), Side::Buy).await,
            Err(QuoteError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_notional() {
        let provider = RetryingQuoteProvider::new(
            FlakyProvider {
                failures: 0,
                calls: AtomicU32::new(0),
            },
            fast_retry(None),
        );
        assert!(matches!(
            provider.get_quote("SOL", Decimal::ZERO, Side::Buy).await,
            Err(QuoteError::InvalidNotional(_))
        ));
    }

    #[test]
    fn test_backoff_doubles() {
        let provider = RetryingQuoteProvider::new(
            FlakyProvider {
                failures: 0,
                calls: AtomicU32::new(0),
            },
            RetryConfig::default(),
        );
        assert_eq!(provider.backoff(0), Duration::from_millis(250));
        assert_eq!(provider.backoff(1), Duration::from_millis(500));
        assert_eq!(provider.backoff(3), Duration::from_millis(2000));
    }
}
