use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ninjaexa::config::{LimiterConfig, ENV_OVERRIDES};
use ninjaexa::error::NinjaexaError;
use ninjaexa::ratelimit::{admit, human_duration, RateLimiter, Snapshot};

/// NinjaExa rate limiter status and maintenance.
#[derive(Parser, Debug)]
#[command(name = "ninjaexa-rate-limiter", version, about)]
struct Cli {
    /// Show current usage and penalty state (default)
    #[arg(long, conflicts_with_all = ["reset", "check"])]
    status: bool,

    /// Clear all counters and penalties
    #[arg(long, conflicts_with = "check")]
    reset: bool,

    /// Record one request, waiting out any delay; exits 1 if blocked
    #[arg(long)]
    check: bool,

    /// Print the status as JSON
    #[arg(long, conflicts_with_all = ["reset", "check"])]
    json: bool,

    /// YAML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = LimiterConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Invalid rate limiter configuration, using defaults");
        LimiterConfig::default()
    });
    let limiter = RateLimiter::new(config);

    if cli.reset {
        limiter
            .reset()
            .context("failed to reset rate limiter state")?;
        println!("[OK] Rate limiter state reset");
        return Ok(ExitCode::SUCCESS);
    }

    if cli.check {
        return match admit(Arc::new(limiter)).await {
            Ok(decision) => {
                if !decision.message.is_empty() {
                    eprintln!("{}", decision.message);
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(NinjaexaError::Denied(message)) => {
                eprintln!("{message}");
                Ok(ExitCode::from(1))
            }
            Err(e) => Err(e.into()),
        };
    }

    let snapshot = limiter.status();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_status(&snapshot);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_status(snapshot: &Snapshot) {
    println!("=== NinjaExa Rate Limiter Status ===");
    println!();

    if snapshot.disabled {
        println!("[WARNING] Rate limiting is DISABLED (NINJAEXA_NO_RATE_LIMIT=1)");
        println!();
    }

    for window in &snapshot.windows {
        let name = format!("Requests ({}):", window.window.unit());
        let cap = if window.hard_capped { "" } else { " (burst baseline)" };
        println!(
            "{:<20}{:>5} / {:<6} resets in {}{}",
            name,
            window.count,
            window.limit,
            human_duration(window.resets_in_seconds),
            cap
        );
    }
    println!();

    println!(
        "Penalty level: {} (0=none, higher=stricter)",
        snapshot.penalty_level
    );
    if snapshot.current_delay_seconds > 0.0 {
        println!("Current delay: {:.1}s", snapshot.current_delay_seconds);
    } else {
        println!("Current delay: none");
    }
    if let Some(last) = snapshot.last_request {
        println!("Last request:  {}", last.to_rfc3339());
    }
    println!("State file:    {}", snapshot.state_file.display());

    println!();
    println!("Environment overrides:");
    for (var, key) in ENV_OVERRIDES {
        println!("  {var:<28} {key}");
    }
}
