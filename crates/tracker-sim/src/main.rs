//! Field tracker simulator
//!
//! Runs the tracker control core against in-memory hardware, paced by a
//! wall-clock tick, and prints a JSON run report at the end.
//!
//! # Usage
//!
//! Default configuration, 1000 ticks:
//! ```bash
//! ./tracker-sim
//! ```
//!
//! Replay a host script against a configured device:
//! ```bash
//! ./tracker-sim --config config/tracker-sim.toml --script host.txt --report run.json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tracker_sim::{ScriptConfig, SimConfig, Simulator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "tracker-sim")]
#[command(about = "Field tracker control core simulator")]
struct Args {
    /// Configuration file path (TOML, or YAML by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Number of ticks to run, overriding the configuration (0 = until Ctrl+C)
    #[arg(long)]
    ticks: Option<u64>,

    /// Host script, one hex packet per line
    #[arg(long)]
    script: Option<PathBuf>,

    /// Write the run report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "tracker_sim=debug,tracker_core=debug"
    } else {
        "tracker_sim=info,tracker_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
    }

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            SimConfig::load_any(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(ticks) = args.ticks {
        config.run.ticks = ticks;
    }
    if let Some(path) = &args.script {
        config.script = Some(
            ScriptConfig::from_file(path)
                .with_context(|| format!("Failed to read script {}", path.display()))?,
        );
    }

    let mut sim = Simulator::new(&config).context("Failed to build simulator")?;

    info!(
        ticks = config.run.ticks,
        tick_period_ms = config.run.tick_period_ms,
        "Starting tracker simulator"
    );

    let mut interval =
        tokio::time::interval(Duration::from_millis(config.run.tick_period_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if config.run.ticks != 0 && sim.ticks() >= config.run.ticks {
            break;
        }
        tokio::select! {
            _ = interval.tick() => sim.step(),
            _ = &mut ctrl_c => {
                info!("Shutting down...");
                break;
            }
        }
    }

    let report = sim.report();
    info!(
        state = ?report.final_state,
        ticks = report.ticks,
        reboots = report.reboots,
        "Simulation finished"
    );

    let json = serde_json::to_string_pretty(&report)?;
    match &args.report {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?,
        None => println!("{}", json),
    }

    Ok(())
}
