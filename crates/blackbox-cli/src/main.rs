//! Black-box stress driver for the panic-attack binary.
//!
//! Repeatedly invokes `panic-attack assault` with randomized axes, intensity,
//! duration, and probe mode, logging every invocation and writing a
//! machine-readable summary for triage.

use anyhow::Result;
use blackbox_runner::{run_session, OsProcessRunner, SessionConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "blackbox", version, about = "Randomized stress driver for panic-attack")]
struct Cli {
    /// Number of assault trials to run
    #[arg(long, default_value_t = 5)]
    runs: u32,

    /// Seed for reproducible parameter sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Build panic-attack and the attack harness before running
    #[arg(long)]
    build: bool,

    /// Source directory passed to the assault subcommand
    #[arg(long)]
    source: Option<PathBuf>,

    /// Target binary to attack
    #[arg(long)]
    target: Option<PathBuf>,

    /// Directory for per-run logs and the summary
    #[arg(long, default_value = "blackbox-logs")]
    outdir: PathBuf,

    /// Pass the example attack profile when it exists
    #[arg(long)]
    use_profile: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let root = std::env::current_dir()?;
    let config = SessionConfig {
        runs: cli.runs,
        seed: cli.seed,
        build: cli.build,
        source: cli.source.unwrap_or_else(|| root.clone()),
        target: cli
            .target
            .unwrap_or_else(|| root.join("target/debug/examples/attack_harness")),
        binary: root.join("target/debug/panic-attack"),
        outdir: cli.outdir.clone(),
        reports_dir: root.join("reports"),
        profile: cli
            .use_profile
            .then(|| root.join("profiles/attack-profile.example.json")),
    };

    let summary = run_session(&config, &OsProcessRunner)?;
    if !summary.failures.is_empty() {
        println!(
            "{} runs failed. See {}/summary.json",
            summary.failures.len(),
            cli.outdir.display()
        );
        std::process::exit(1);
    }
    println!(
        "All {} runs completed successfully. Logs: {}",
        summary.runs,
        cli.outdir.display()
    );
    Ok(())
}
