//! CLI for Repo Sentinel.
//!
//! This tool watches the GitHub repositories checked out under a root
//! directory and, when one of them receives a push, pulls it, refreshes its
//! dependencies and restarts its service.

use clap::Parser;
use repo_sentinel::{AgentConfig, ConfigOverrides, CycleSummary, Runner, RunnerError};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Repo Sentinel - Keep checked-out repositories and their services up to date.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding checkouts laid out as `<owner>/<name>`.
    #[arg(long, env = "SENTINEL_ROOT")]
    root: Option<PathBuf>,

    /// GitHub access token. Falls back to `GITHUB_TOKEN`.
    #[arg(long)]
    token: Option<String>,

    /// Maximum repositories polled at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Poll and report updates without running them.
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    // Octocrab's TLS stack needs a process-wide provider.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();

    match run(args).await {
        Ok(Some(summary)) => {
            print_summary(&summary);

            if summary.has_failures() {
                ExitCode::from(1)
            } else {
                ExitCode::from(0)
            }
        }
        Ok(None) => ExitCode::from(0),
        Err(e) => {
            error!(error = %e, "Critical failure");
            ExitCode::from(2)
        }
    }
}

/// Initializes tracing with environment filter support.
///
/// Sets up the global tracing subscriber with:
/// - Compact log formatting (single-line output)
/// - Log level filtering via `RUST_LOG` env var (defaults to "info")
fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Main execution logic.
///
/// Returns the cycle summary in single-cycle mode.
async fn run(args: Args) -> Result<Option<CycleSummary>, RunnerError> {
    let overrides = ConfigOverrides {
        root: args.root,
        credential: args.token,
        concurrency: args.concurrency,
        dry_run: args.dry_run,
    };
    let config = AgentConfig::load(args.config.as_deref(), overrides)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let runner = Runner::new(config, shutdown_rx)?;
    if args.once {
        return Ok(Some(runner.run_once().await));
    }

    runner.run().await;
    Ok(None)
}

/// Prints the summary of a single cycle.
fn print_summary(summary: &CycleSummary) {
    println!("\nSummary:");
    println!(
        "  Mode: {}",
        if summary.dry_run { "Dry Run" } else { "Live" }
    );

    if summary.discovery_failed {
        println!("  Discovery: failed");
        return;
    }

    println!(
        "  Repositories discovered: {}",
        summary.repositories_discovered
    );
    println!("  Discovery errors: {}", summary.discovery_errors);
    println!("  Unchanged: {}", summary.unchanged);
    println!("  With events: {}", summary.observed);
    println!(
        "  {}: {}",
        if summary.dry_run { "Would update" } else { "Updated" },
        summary.updated
    );
    println!("  Update failures: {}", summary.update_failures);
    println!("  Poll failures: {}", summary.poll_failures);
    println!("  Skipped: {}", summary.skipped);
}
