//! Priority-bundle execution simulator.
//!
//! Models a bundle submission as a latency draw followed by a Bernoulli
//! inclusion trial. An excluded bundle produces no fill and no fee.

use std::time::Duration;

use accum_common::{MarketState, Side};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tracing::{debug, info, warn};

use super::{
    ExecutionError, ExecutionReport, ExecutionRequest, ExecutionRoute, ExecutionSimulator,
    FillOutcome, FillRejection, RejectionReason, SimFill,
};

/// Configuration for the bundle simulator.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub base_latency_ms: f64,
    /// Standard deviation of the latency jitter.
    pub latency_jitter_ms: f64,
    pub min_latency_ms: f64,
    /// Probability the bundle lands (0-1).
    pub inclusion_probability: f64,
    pub base_slippage_bps: f64,
    /// Extra slippage per 100ms of latency.
    pub latency_slippage_bps_per_100ms: f64,
    /// Slippage per unit of volatility (0.01 vol = 1 bps at 100).
    pub volatility_slippage_factor: f64,
    /// Priority tip in the chain's smallest unit.
    pub tip_lamports: u64,
    pub lamports_per_native: u64,
    /// Flat network fee in native units.
    pub network_fee_native: Decimal,
    /// Sleep for the drawn latency.
    pub simulate_delay: bool,
    pub seed: u64,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 150.0,
            latency_jitter_ms: 50.0,
            min_latency_ms: 50.0,
            inclusion_probability: 0.95,
            base_slippage_bps: 5.0,
            latency_slippage_bps_per_100ms: 1.0,
            volatility_slippage_factor: 100.0,
            tip_lamports: 10_000,
            lamports_per_native: 1_000_000_000,
            network_fee_native: Decimal::new(5, 6), // 0.000005
            simulate_delay: true,
            seed: 42,
        }
    }
}

/// Latency + inclusion bundle simulator.
pub struct BundleSimulator {
    config: BundleConfig,
    rng: StdRng,
    jitter: Option<Normal<f64>>,
}

impl BundleSimulator {
    pub fn new(config: BundleConfig) -> Self {
        let jitter = Normal::new(0.0, config.latency_jitter_ms.max(0.0)).ok();
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            jitter,
            config,
        }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    fn draw_latency_ms(&mut self) -> f64 {
        let jitter = match &self.jitter {
            Some(dist) => dist.sample(&mut self.rng),
            None => 0.0,
        };
        let latency = (self.config.base_latency_ms + jitter).max(self.config.min_latency_ms);
        if latency.is_finite() {
            latency.max(0.0)
        } else {
            self.config.min_latency_ms.max(0.0)
        }
    }

    fn draw_inclusion(&mut self) -> bool {
        let p = self.config.inclusion_probability.clamp(0.0, 1.0);
        self.rng.gen_bool(p)
    }

    /// Slippage for a landed bundle.
    pub fn slippage_bps(&self, latency_ms: f64, volatility: f64) -> f64 {
        self.config.base_slippage_bps
            + self.config.latency_slippage_bps_per_100ms * latency_ms / 100.0
            + volatility * self.config.volatility_slippage_factor
    }

    /// Tip plus network fee, converted to quote currency at `price`.
    pub fn fee(&self, price: Decimal) -> Decimal {
        let per_native = Decimal::from(self.config.lamports_per_native.max(1));
        let tip_native = Decimal::from(self.config.tip_lamports) / per_native;
        (tip_native + self.config.network_fee_native) * price
    }
}

#[async_trait]
impl ExecutionSimulator for BundleSimulator {
    fn route(&self) -> ExecutionRoute {
        ExecutionRoute::Bundle
    }

    async fn execute(
        &mut self,
        request: &ExecutionRequest,
        snapshot: &MarketState,
    ) -> Result<ExecutionReport, ExecutionError> {
        let mut report =
            ExecutionReport::new(&request.request_id, ExecutionRoute::Bundle, Utc::now());

        let latency_ms = self.draw_latency_ms();
        if self.config.simulate_delay
            && let Ok(delay) = Duration::try_from_secs_f64(latency_ms / 1000.0)
        {
            tokio::time::sleep(delay).await;
        }

        if !self.draw_inclusion() {
            warn!(request_id = %request.request_id, latency_ms, "Bundle not included");
            report.outcomes.push(FillOutcome::Rejected(FillRejection {
                slice_index: 0,
                reason: RejectionReason::NotIncluded { latency_ms },
                timestamp: Utc::now(),
            }));
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let slippage_bps = self.slippage_bps(latency_ms, snapshot.volatility);
        let slip = Decimal::from_f64(slippage_bps / 10_000.0).unwrap_or(Decimal::ZERO);
        let price = match request.side {
            Side::Buy => snapshot.ask * (Decimal::ONE + slip),
            Side::Sell => snapshot.bid * (Decimal::ONE - slip),
        };
        let fee = self.fee(snapshot.price);
        debug!(
            request_id = %request.request_id,
            latency_ms,
            slippage_bps,
            %price,
            %fee,
            "Bundle landed"
        );

        report.outcomes.push(FillOutcome::Filled(SimFill {
            fill_id: format!("{}-bundle", request.request_id),
            slice_index: 0,
            side: request.side,
            price,
            notional: request.notional,
            fee,
            slippage_bps,
            latency_ms,
            timestamp: Utc::now(),
        }));
        report.finished_at = Utc::now();
        info!(request_id = %request.request_id, %price, latency_ms, "Bundle execution filled");
        Ok(report)
    }
}
