// Numan Thabit 2025
mod batch;
mod config;
mod report;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use stackbench::{Orchestrator, Registry};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    batch::{plan_jobs, run_jobs},
    config::{locate_registry, RegistryArgs, RunArgs, RunConfig},
    report::{Report, SystemInfo, ToolVersions},
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Cross-stack benchmark runner",
    rename_all = "kebab-case"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run benchmarks and write a JSON report.
    Run(RunArgs),
    /// List registered technologies and their benchmarks.
    List(RegistryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::List(args) => list(args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = RunConfig::from_cli(&args)?;
    let registry = Arc::new(
        Registry::load(&config.registry_path).context("failed to load technology registry")?,
    );

    let jobs = plan_jobs(&registry, &config.technologies, &config.tests)?;
    if jobs.is_empty() {
        warn!("selection matched no registered benchmarks");
        return Ok(());
    }
    info!(jobs = jobs.len(), "benchmark plan ready");

    let orchestrator = Orchestrator::new(Arc::clone(&registry), config.engine.clone())
        .context("failed to initialise orchestrator")?;
    // Benchmarks run in their own process groups and miss the terminal's
    // Ctrl-C; dropping the batch future kills the running one.
    let outcome = tokio::select! {
        outcome = run_jobs(&orchestrator, &jobs, &config) => outcome,
        () = shutdown_signal() => bail!("interrupted; no report written"),
    };

    if outcome.results.is_empty() {
        warn!(failed = outcome.failed.len(), "no benchmark succeeded; report not written");
        return Ok(());
    }

    let versions = ToolVersions::gather(&registry, &config.engine.project_root).await;
    let report = Report::new(outcome.results, SystemInfo::gather(), versions)?;
    let path = report.write_to_dir(&config.output_dir)?;
    info!(path = %path.display(), failed = outcome.failed.len(), "benchmark run complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(%err, "failed to install interrupt handler");
        std::future::pending::<()>().await;
    }
    info!("interrupt received");
}

fn list(args: RegistryArgs) -> Result<()> {
    let (path, _) = locate_registry(args.registry, args.project_root)?;
    let registry = Registry::load(&path).context("failed to load technology registry")?;
    for (id, entry) in registry.iter() {
        println!("{id} ({})", entry.name);
        for (name, benchmark) in &entry.benchmarks {
            println!("  {name:<24} {}", benchmark.kind);
        }
    }
    Ok(())
}
