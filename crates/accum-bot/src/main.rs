//! accum-bot: simulated trading-decision loop.
//!
//! Usage:
//!   accum-bot [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>          Config file path (default: config/accum.toml)
//!   -n, --iterations <N>         Cycles to run, 0 = until stopped
//!   --delay-ms <MS>              Delay between cycles
//!   --execute                    Execute approved entries (default: decide only)
//!   --min-confidence <F>         Consensus confidence threshold
//!   -o, --output <PATH>          Metrics JSON path
//!   --data-source <SOURCE>       mock or replay
//!   --replay <PATH>              Replay snapshot file (implies replay source)
//!   --route <ROUTE>              paper, sliced or bundle
//!   --seed <N>                   Seed for every random source

use std::path::PathBuf;
use std::process::ExitCode;

use accum_bot::config::{BotConfig, CliOverrides};
use accum_bot::orchestrator::Orchestrator;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

/// CLI arguments for accum-bot.
#[derive(Parser, Debug)]
#[command(name = "accum-bot")]
#[command(about = "Simulated trading-decision pipeline")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/accum.toml")]
    config: PathBuf,

    /// Number of cycles (0 = run until stopped)
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Delay between cycles in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Execute approved entries instead of only deciding
    #[arg(long)]
    execute: bool,

    /// Minimum consensus confidence (0-1)
    #[arg(long)]
    min_confidence: Option<f64>,

    /// Metrics JSON output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Market data source: mock or replay
    #[arg(long)]
    data_source: Option<String>,

    /// Recorded snapshots (JSON array) for the replay source
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Execution route: paper, sliced or bundle
    #[arg(long)]
    route: Option<String>,

    /// Seed for the mock market, exploration and bundle draws
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        let missing = matches!(
            e,
            dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound
        );
        if !missing {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let config_missing = !args.config.exists();
    let mut config = if config_missing {
        BotConfig::default()
    } else {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    };

    config.apply_env_overrides();
    config.apply_cli_overrides(CliOverrides {
        iterations: args.iterations,
        delay_ms: args.delay_ms,
        execute: args.execute,
        min_confidence: args.min_confidence,
        output: args.output,
        data_source: args.data_source,
        replay: args.replay,
        route: args.route,
        seed: args.seed,
    });

    // Initialize logging
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    if config_missing {
        warn!("Config file not found at {:?}, using defaults", args.config);
    }

    config.validate().context("Configuration validation failed")?;

    info!("Starting accum-bot");
    info!("Symbol: {}", config.run.symbol);
    info!("Data source: {}", config.data_source);
    info!("Route: {}", config.run.route);
    info!("Mode: {}", if config.run.execute { "execute" } else { "decide" });
    info!("Engines: {:?}", config.engines);

    let mut orchestrator = Orchestrator::from_config(&config)?;

    let control = orchestrator.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current cycle");
            control.request_shutdown();
        }
    });

    let summary = orchestrator.run().await;

    info!(
        "Run complete: {} cycles, {} executed, {} blocked, {} trades, capital {} ({:.2}%)",
        summary.counters.cycles,
        summary.counters.executed,
        summary.counters.blocked,
        summary.trading_summary.total_trades,
        summary.trading_summary.current_capital,
        summary.trading_summary.return_pct,
    );
    if let Some(reason) = &summary.halt_reason {
        warn!("Run halted by circuit breaker: {}", reason);
    }
    info!("Metrics written to {}", config.metrics_path.display());

    Ok(())
}
