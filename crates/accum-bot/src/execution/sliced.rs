//! Time-sliced (TWAP) order simulator.
//!
//! Splits a notional into equal slices executed in order. Each slice is
//! re-quoted through the injected `QuoteProvider`; a quote whose slippage
//! exceeds the tolerance is recorded as a rejection and the simulator moves
//! on to the next slice after the usual interval.

use std::sync::Arc;
use std::time::Duration;

use accum_common::MarketState;
use accum_market::QuoteProvider;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{
    ExecutionError, ExecutionReport, ExecutionRequest, ExecutionRoute, ExecutionSimulator,
    FillOutcome, FillRejection, RejectionReason, SimFill,
};

/// Configuration for time-sliced execution.
#[derive(Debug, Clone)]
pub struct SlicedConfig {
    pub num_slices: u32,
    /// Delay between consecutive slices.
    pub slice_interval: Duration,
    /// Maximum accepted quote slippage per slice.
    pub slippage_tolerance_bps: f64,
    /// Simulated latency of each filled slice.
    pub execution_latency: Duration,
}

impl Default for SlicedConfig {
    fn default() -> Self {
        Self {
            num_slices: 5,
            slice_interval: Duration::from_secs(2),
            slippage_tolerance_bps: 100.0,
            execution_latency: Duration::from_millis(100),
        }
    }
}

/// Time-weighted slice executor.
pub struct TwapSimulator {
    config: SlicedConfig,
    quotes: Arc<dyn QuoteProvider>,
}

impl TwapSimulator {
    pub fn new(config: SlicedConfig, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { config, quotes }
    }

    pub fn config(&self) -> &SlicedConfig {
        &self.config
    }

    /// Equal slices; the last one absorbs the rounding remainder.
    fn slice_notionals(&self, total: Decimal) -> Vec<Decimal> {
        let n = self.config.num_slices.max(1);
        let each = (total / Decimal::from(n)).round_dp(8);
        let mut slices = vec![each; n as usize];
        let assigned = each * Decimal::from(n - 1);
        if let Some(last) = slices.last_mut() {
            *last = total - assigned;
        }
        slices
    }
}

#[async_trait]
impl ExecutionSimulator for TwapSimulator {
    fn route(&self) -> ExecutionRoute {
        ExecutionRoute::Sliced
    }

    async fn execute(
        &mut self,
        request: &ExecutionRequest,
        _snapshot: &MarketState,
    ) -> Result<ExecutionReport, ExecutionError> {
        let mut report =
            ExecutionReport::new(&request.request_id, ExecutionRoute::Sliced, Utc::now());
        let slices = self.slice_notionals(request.notional);
        let total_slices = slices.len();

        for (index, notional) in slices.into_iter().enumerate() {
            if index > 0 && !self.config.slice_interval.is_zero() {
                tokio::time::sleep(self.config.slice_interval).await;
            }

            let quote = match self
                .quotes
                .get_quote(&request.symbol, notional, request.side)
                .await
            {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(
                        request_id = %request.request_id,
                        slice = index,
                        error = %e,
                        "Slice quote failed"
                    );
                    report.outcomes.push(FillOutcome::Rejected(FillRejection {
                        slice_index: index,
                        reason: RejectionReason::QuoteFailed {
                            reason: e.to_string(),
                        },
                        timestamp: Utc::now(),
                    }));
                    continue;
                }
            };
            debug!(
                request_id = %request.request_id,
                slice = index,
                price = %quote.price,
                slippage_bps = quote.slippage_bps,
                fallback = quote.is_fallback,
                "Slice quoted"
            );

            if quote.slippage_bps > self.config.slippage_tolerance_bps {
                let reason = RejectionReason::SlippageExceeded {
                    slippage_bps: quote.slippage_bps,
                    tolerance_bps: self.config.slippage_tolerance_bps,
                };
                warn!(
                    request_id = %request.request_id,
                    slice = index,
                    reason = %reason,
                    "Slice rejected"
                );
                report.outcomes.push(FillOutcome::Rejected(FillRejection {
                    slice_index: index,
                    reason,
                    timestamp: Utc::now(),
                }));
                continue;
            }

            if !self.config.execution_latency.is_zero() {
                tokio::time::sleep(self.config.execution_latency).await;
            }
            report.outcomes.push(FillOutcome::Filled(SimFill {
                fill_id: format!("{}-{}", request.request_id, index),
                slice_index: index,
                side: request.side,
                price: quote.price,
                notional,
                fee: quote.fee,
                slippage_bps: quote.slippage_bps,
                latency_ms: self.config.execution_latency.as_secs_f64() * 1000.0,
                timestamp: Utc::now(),
            }));
        }

        report.finished_at = Utc::now();
        info!(
            request_id = %request.request_id,
            filled = report.filled_count(),
            rejected = report.rejected_count(),
            slices = total_slices,
            "Sliced execution finished"
        );
        Ok(report)
    }
}
