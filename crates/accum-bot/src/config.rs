//! Configuration for accum-bot.
//!
//! Supports loading from TOML file with environment variable overrides.
//! Every runtime config of the pipeline is built here from one file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use accum_market::{MockMarketConfig, RetryConfig};
use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::consensus::ConsensusConfig;
use crate::engine::{AllocationConfig, TabularConfig};
use crate::execution::{BundleConfig, ExecutionRoute, PaperConfig, SlicedConfig};
use crate::gate::GateConfig;
use crate::orchestrator::RunConfig;
use crate::risk::CircuitBreakerConfig;
use crate::sizing::LeverageConfig;

/// Engine names accepted in `consensus.engines`.
pub const KNOWN_ENGINES: [&str; 2] = ["allocation", "tabular"];

/// Top-level configuration for accum-bot.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Logging level.
    pub log_level: String,

    /// Where the metrics JSON is written after every cycle.
    pub metrics_path: PathBuf,

    /// Seed for every random source (mock market, exploration, bundles).
    pub seed: u64,

    /// Market data source.
    pub data_source: DataSource,

    /// Recorded snapshots for the replay source.
    pub replay_path: Option<PathBuf>,

    /// Fetcher cache lifetime for the mock source (zero disables caching).
    pub cache_ttl: Duration,

    /// Decision engines to register, in vote order.
    pub engines: Vec<String>,

    pub mock: MockMarketConfig,
    pub quote_retry: RetryConfig,
    pub gate: GateConfig,
    pub consensus: ConsensusConfig,
    pub allocation: AllocationConfig,
    pub tabular: TabularConfig,
    pub leverage: LeverageConfig,
    pub paper: PaperConfig,
    pub sliced: SlicedConfig,
    pub bundle: BundleConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub run: RunConfig,
}

/// Where snapshots come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Seeded random walk.
    Mock,
    /// Recorded JSON snapshots.
    Replay,
}

impl DataSource {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(DataSource::Mock),
            "replay" => Some(DataSource::Replay),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Mock => write!(f, "mock"),
            DataSource::Replay => write!(f, "replay"),
        }
    }
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub iterations: Option<u64>,
    pub delay_ms: Option<u64>,
    pub execute: bool,
    pub min_confidence: Option<f64>,
    pub output: Option<PathBuf>,
    pub data_source: Option<String>,
    pub replay: Option<PathBuf>,
    pub route: Option<String>,
    pub seed: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::from(TomlConfig::default())
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("ACCUM_METRICS_PATH") {
            self.metrics_path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("ACCUM_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(value) = std::env::var("ACCUM_MIN_CONFIDENCE")
            && let Ok(min) = value.parse::<f64>()
        {
            self.set_min_confidence(min);
        }
        if let Ok(value) = std::env::var("ACCUM_SEED")
            && let Ok(seed) = value.parse::<u64>()
        {
            self.set_seed(seed);
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(&mut self, cli: CliOverrides) {
        if let Some(iterations) = cli.iterations {
            self.run.iterations = iterations;
        }
        if let Some(ms) = cli.delay_ms {
            self.run.cycle_delay = Duration::from_millis(ms);
        }
        if cli.execute {
            self.run.execute = true;
        }
        if let Some(min) = cli.min_confidence {
            self.set_min_confidence(min);
        }
        if let Some(path) = cli.output {
            self.metrics_path = path;
        }
        if let Some(source) = cli.data_source
            && let Some(s) = DataSource::from_str(&source)
        {
            self.data_source = s;
        }
        if let Some(path) = cli.replay {
            self.replay_path = Some(path);
            self.data_source = DataSource::Replay;
        }
        if let Some(route) = cli.route
            && let Some(r) = ExecutionRoute::from_str(&route)
        {
            self.run.route = r;
        }
        if let Some(seed) = cli.seed {
            self.set_seed(seed);
        }
    }

    fn set_min_confidence(&mut self, min: f64) {
        self.run.min_confidence = min;
        self.consensus.min_confidence = min;
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
        self.mock.seed = seed;
        self.tabular.seed = seed;
        self.bundle.seed = seed;
    }

    /// Validate configuration and return errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.paper.initial_capital <= Decimal::ZERO {
            bail!("initial_capital must be positive");
        }
        if self.paper.fee_rate < Decimal::ZERO {
            bail!("fee_rate cannot be negative");
        }

        let alloc = &self.allocation;
        if !(0.0..=1.0).contains(&alloc.ewma_alpha) || alloc.ewma_alpha == 0.0 {
            bail!("ewma_alpha must be in (0, 1]");
        }
        if alloc.min_allocation < 0.0 || alloc.min_allocation > alloc.max_allocation {
            bail!("min_allocation must be non-negative and not exceed max_allocation");
        }
        if alloc.max_allocation > 1.0 {
            bail!("max_allocation cannot exceed 1");
        }

        let lev = &self.leverage;
        if lev.max_leverage < Decimal::ONE || lev.max_leverage > accum_common::MAX_LEVERAGE {
            bail!("max_leverage must be between 1 and {}", accum_common::MAX_LEVERAGE);
        }
        if lev.min_position_pct < Decimal::ZERO
            || lev.min_position_pct > lev.max_position_pct
            || lev.max_position_pct > Decimal::ONE
        {
            bail!("position percentages must satisfy 0 <= min <= max <= 1");
        }

        if self.sliced.num_slices == 0 {
            bail!("num_slices must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.bundle.inclusion_probability) {
            bail!("inclusion_probability must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&self.run.min_confidence) {
            bail!("min_confidence must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&self.gate.max_mev_risk) {
            bail!("max_mev_risk must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&self.tabular.epsilon)
            || !(0.0..=1.0).contains(&self.tabular.min_epsilon)
        {
            bail!("epsilon values must be between 0 and 1");
        }
        if self.gate.max_latency_ms <= 0.0
            || self.gate.max_price_jump_pct <= 0.0
            || self.gate.max_ema_deviation_pct <= 0.0
        {
            bail!("gate thresholds must be positive");
        }
        let bundle = &self.bundle;
        for (name, value) in [
            ("base_latency_ms", bundle.base_latency_ms),
            ("latency_jitter_ms", bundle.latency_jitter_ms),
            ("min_latency_ms", bundle.min_latency_ms),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{} must be a finite, non-negative number", name);
            }
        }
        if !self.mock.max_step.is_finite() || self.mock.max_step < 0.0 {
            bail!("max_step_pct must be a finite, non-negative number");
        }
        if self.circuit_breaker.max_drawdown_pct <= 0.0
            || self.circuit_breaker.max_daily_loss_pct <= 0.0
        {
            bail!("circuit breaker percentages must be positive");
        }

        if self.data_source == DataSource::Replay && self.replay_path.is_none() {
            bail!("Replay data source requires a replay path");
        }
        if self.run.symbol.is_empty() {
            bail!("symbol must not be empty");
        }
        if self.engines.is_empty() {
            bail!("At least one decision engine must be configured");
        }
        for name in &self.engines {
            if !KNOWN_ENGINES.contains(&name.as_str()) {
                bail!("Unknown decision engine: {}", name);
            }
        }

        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    data: DataToml,
    #[serde(default)]
    gate: GateToml,
    #[serde(default)]
    consensus: ConsensusToml,
    #[serde(default)]
    allocation: AllocationToml,
    #[serde(default)]
    tabular: TabularToml,
    #[serde(default)]
    leverage: LeverageToml,
    #[serde(default)]
    paper: PaperToml,
    #[serde(default)]
    sliced: SlicedToml,
    #[serde(default)]
    bundle: BundleToml,
    #[serde(default)]
    circuit_breaker: CircuitBreakerToml,
    #[serde(default)]
    run: RunToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
    metrics_path: String,
    seed: u64,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_path: "data/metrics.json".to_string(),
            seed: 42,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DataToml {
    source: String,
    replay_path: Option<String>,
    cache_ttl_ms: u64,
    initial_price: f64,
    max_step_pct: f64,
    quote_max_retries: u32,
    quote_backoff_ms: u64,
    quote_fallback_slippage_bps: f64,
    quote_fallback_fee_pct: f64,
}

impl Default for DataToml {
    fn default() -> Self {
        Self {
            source: "mock".to_string(),
            replay_path: None,
            cache_ttl_ms: 0,
            initial_price: 100.0,
            max_step_pct: 0.5,
            quote_max_retries: 3,
            quote_backoff_ms: 250,
            quote_fallback_slippage_bps: 10.0,
            quote_fallback_fee_pct: 0.1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GateToml {
    max_mev_risk: f64,
    max_latency_ms: f64,
    max_price_jump_pct: f64,
    max_ema_deviation_pct: f64,
    min_volume_24h: f64,
    max_spread_pct: f64,
}

impl Default for GateToml {
    fn default() -> Self {
        Self {
            max_mev_risk: 0.7,
            max_latency_ms: 500.0,
            max_price_jump_pct: 5.0,
            max_ema_deviation_pct: 10.0,
            min_volume_24h: 1000.0,
            max_spread_pct: 5.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConsensusToml {
    engine_timeout_ms: u64,
    min_confidence: f64,
    /// Engines to register, in vote order.
    engines: Vec<String>,
}

impl Default for ConsensusToml {
    fn default() -> Self {
        Self {
            engine_timeout_ms: 500,
            min_confidence: 0.75,
            engines: vec!["allocation".to_string(), "tabular".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AllocationToml {
    ewma_alpha: f64,
    min_allocation: f64,
    max_allocation: f64,
    leverage_ceiling: f64,
}

impl Default for AllocationToml {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            min_allocation: 0.01,
            max_allocation: 0.5,
            leverage_ceiling: 3.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TabularToml {
    learning_rate: f64,
    discount_factor: f64,
    epsilon: f64,
    epsilon_decay: f64,
    min_epsilon: f64,
    volatility_bins: [f64; 2],
    liquidity_bins: [f64; 2],
    base_size: f64,
}

impl Default for TabularToml {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.95,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
            volatility_bins: [0.02, 0.05],
            liquidity_bins: [0.4, 0.7],
            base_size: 0.1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LeverageToml {
    max_leverage: f64,
    max_position_pct: f64,
    min_position_pct: f64,
    high_volatility_threshold: f64,
    volatility_size_dampening: f64,
    volatility_leverage_dampening: f64,
    scale_by_liquidity: bool,
    margin_interest_rate: f64,
}

impl Default for LeverageToml {
    fn default() -> Self {
        Self {
            max_leverage: 5.0,
            max_position_pct: 35.0,
            min_position_pct: 1.0,
            high_volatility_threshold: 0.05,
            volatility_size_dampening: 0.7,
            volatility_leverage_dampening: 0.6,
            scale_by_liquidity: true,
            margin_interest_rate: 0.0001,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PaperToml {
    initial_capital: f64,
    fee_pct: f64,
    base_slippage_bps: f64,
    size_normalization: f64,
    volatility_normalization: f64,
    fill_latency_ms: u64,
}

impl Default for PaperToml {
    fn default() -> Self {
        Self {
            initial_capital: 1000.0,
            fee_pct: 0.05,
            base_slippage_bps: 2.0,
            size_normalization: 1000.0,
            volatility_normalization: 0.05,
            fill_latency_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SlicedToml {
    num_slices: u32,
    slice_interval_ms: u64,
    slippage_tolerance_bps: f64,
    execution_latency_ms: u64,
}

impl Default for SlicedToml {
    fn default() -> Self {
        Self {
            num_slices: 5,
            slice_interval_ms: 2000,
            slippage_tolerance_bps: 100.0,
            execution_latency_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BundleToml {
    base_latency_ms: f64,
    latency_jitter_ms: f64,
    min_latency_ms: f64,
    inclusion_probability: f64,
    base_slippage_bps: f64,
    latency_slippage_bps_per_100ms: f64,
    volatility_slippage_factor: f64,
    tip_lamports: u64,
    network_fee_native: f64,
    simulate_delay: bool,
}

impl Default for BundleToml {
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
            network_fee_native: 0.000005,
            simulate_delay: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CircuitBreakerToml {
    max_drawdown_pct: f64,
    max_daily_loss_pct: f64,
    max_consecutive_losses: u32,
}

impl Default for CircuitBreakerToml {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 20.0,
            max_daily_loss_pct: 10.0,
            max_consecutive_losses: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RunToml {
    symbol: String,
    iterations: u64,
    cycle_delay_ms: u64,
    execute: bool,
    max_hold_cycles: u64,
    close_on_finish: bool,
    route: String,
}

impl Default for RunToml {
    fn default() -> Self {
        Self {
            symbol: "SOL".to_string(),
            iterations: 10,
            cycle_delay_ms: 1000,
            execute: false,
            max_hold_cycles: 10,
            close_on_finish: true,
            route: "paper".to_string(),
        }
    }
}

/// Convert f64 percentage to Decimal ratio (e.g., 2.5 -> 0.025).
fn pct_to_decimal(pct: f64) -> Decimal {
    Decimal::try_from(pct / 100.0).unwrap_or(Decimal::ZERO)
}

/// Convert f64 to Decimal.
fn f64_to_decimal(val: f64) -> Decimal {
    Decimal::try_from(val).unwrap_or(Decimal::ZERO)
}

impl From<TomlConfig> for BotConfig {
    fn from(toml: TomlConfig) -> Self {
        let seed = toml.general.seed;
        let data = toml.data;
        Self {
            log_level: toml.general.log_level,
            metrics_path: PathBuf::from(toml.general.metrics_path),
            seed,
            data_source: DataSource::from_str(&data.source).unwrap_or(DataSource::Mock),
            replay_path: data.replay_path.map(PathBuf::from),
            cache_ttl: Duration::from_millis(data.cache_ttl_ms),
            mock: MockMarketConfig {
                initial_price: f64_to_decimal(data.initial_price),
                max_step: data.max_step_pct / 100.0,
                seed,
                ..Default::default()
            },
            quote_retry: RetryConfig {
                max_retries: data.quote_max_retries,
                base_backoff: Duration::from_millis(data.quote_backoff_ms),
                fallback_slippage_bps: data.quote_fallback_slippage_bps,
                fallback_fee_rate: pct_to_decimal(data.quote_fallback_fee_pct),
                fallback_price: None,
            },
            gate: GateConfig {
                max_mev_risk: toml.gate.max_mev_risk,
                max_latency_ms: toml.gate.max_latency_ms,
                max_price_jump_pct: toml.gate.max_price_jump_pct,
                max_ema_deviation_pct: toml.gate.max_ema_deviation_pct,
                min_volume_24h: f64_to_decimal(toml.gate.min_volume_24h),
                max_spread_pct: toml.gate.max_spread_pct,
            },
            consensus: ConsensusConfig {
                engine_timeout: Duration::from_millis(toml.consensus.engine_timeout_ms),
                min_confidence: toml.consensus.min_confidence,
            },
            allocation: AllocationConfig {
                ewma_alpha: toml.allocation.ewma_alpha,
                min_allocation: toml.allocation.min_allocation,
                max_allocation: toml.allocation.max_allocation,
                leverage_ceiling: toml.allocation.leverage_ceiling,
            },
            tabular: TabularConfig {
                learning_rate: toml.tabular.learning_rate,
                discount_factor: toml.tabular.discount_factor,
                epsilon: toml.tabular.epsilon,
                epsilon_decay: toml.tabular.epsilon_decay,
                min_epsilon: toml.tabular.min_epsilon,
                volatility_bins: toml.tabular.volatility_bins,
                liquidity_bins: toml.tabular.liquidity_bins,
                base_size: toml.tabular.base_size,
                seed,
            },
            leverage: LeverageConfig {
                max_leverage: f64_to_decimal(toml.leverage.max_leverage),
                max_position_pct: pct_to_decimal(toml.leverage.max_position_pct),
                min_position_pct: pct_to_decimal(toml.leverage.min_position_pct),
                high_volatility_threshold: toml.leverage.high_volatility_threshold,
                volatility_size_dampening: f64_to_decimal(toml.leverage.volatility_size_dampening),
                volatility_leverage_dampening: f64_to_decimal(
                    toml.leverage.volatility_leverage_dampening,
                ),
                scale_by_liquidity: toml.leverage.scale_by_liquidity,
                margin_interest_rate: f64_to_decimal(toml.leverage.margin_interest_rate),
            },
            paper: PaperConfig {
                initial_capital: f64_to_decimal(toml.paper.initial_capital),
                fee_rate: pct_to_decimal(toml.paper.fee_pct),
                base_slippage_bps: toml.paper.base_slippage_bps,
                size_normalization: f64_to_decimal(toml.paper.size_normalization),
                volatility_normalization: toml.paper.volatility_normalization,
                fill_latency: Duration::from_millis(toml.paper.fill_latency_ms),
            },
            sliced: SlicedConfig {
                num_slices: toml.sliced.num_slices,
                slice_interval: Duration::from_millis(toml.sliced.slice_interval_ms),
                slippage_tolerance_bps: toml.sliced.slippage_tolerance_bps,
                execution_latency: Duration::from_millis(toml.sliced.execution_latency_ms),
            },
            bundle: BundleConfig {
                base_latency_ms: toml.bundle.base_latency_ms,
                latency_jitter_ms: toml.bundle.latency_jitter_ms,
                min_latency_ms: toml.bundle.min_latency_ms,
                inclusion_probability: toml.bundle.inclusion_probability,
                base_slippage_bps: toml.bundle.base_slippage_bps,
                latency_slippage_bps_per_100ms: toml.bundle.latency_slippage_bps_per_100ms,
                volatility_slippage_factor: toml.bundle.volatility_slippage_factor,
                tip_lamports: toml.bundle.tip_lamports,
                network_fee_native: f64_to_decimal(toml.bundle.network_fee_native),
                simulate_delay: toml.bundle.simulate_delay,
                seed,
                ..Default::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                max_drawdown_pct: toml.circuit_breaker.max_drawdown_pct,
                max_daily_loss_pct: toml.circuit_breaker.max_daily_loss_pct,
                max_consecutive_losses: toml.circuit_breaker.max_consecutive_losses,
            },
            run: RunConfig {
                symbol: toml.run.symbol,
                iterations: toml.run.iterations,
                cycle_delay: Duration::from_millis(toml.run.cycle_delay_ms),
                execute: toml.run.execute,
                min_confidence: toml.consensus.min_confidence,
                max_hold_cycles: toml.run.max_hold_cycles,
                close_on_finish: toml.run.close_on_finish,
                route: ExecutionRoute::from_str(&toml.run.route).unwrap_or_default(),
            },
            engines: toml.consensus.engines,
        }
    }
}
