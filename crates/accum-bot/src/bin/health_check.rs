//! accum-health: exit 0 iff the metrics file reports a healthy run.
//!
//! Usage:
//!   accum-health [--metrics <PATH>]

use std::path::PathBuf;
use std::process::ExitCode;

use accum_bot::metrics::{HealthStatus, check_health};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "accum-health")]
#[command(about = "Health check against the accum-bot metrics file")]
#[command(version)]
struct Args {
    /// Metrics JSON path
    #[arg(short, long, default_value = "data/metrics.json")]
    metrics: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match check_health(&args.metrics) {
        HealthStatus::Healthy => {
            println!("healthy: {}", args.metrics.display());
            ExitCode::SUCCESS
        }
        HealthStatus::Unhealthy(reason) => {
            println!("unhealthy: {}", reason);
            ExitCode::FAILURE
        }
    }
}
