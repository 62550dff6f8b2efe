use std::path::PathBuf;
use std::thread::available_parallelism;

use anyhow::Context;
use clap::Parser;
use log::{LevelFilter, error, info};

use confcollect::adapters::DeviceCollector;
use confcollect::dispatch::Dispatcher;
use confcollect::git::commit_and_push;
use confcollect::job::params_schema;
use confcollect::logging::init_logging;
use confcollect::roster::Roster;

/// Collects device configurations into a version-controlled tree.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Turn on debugging output
    #[arg(long, short)]
    verbose: bool,

    /// Errors only (for running from cron)
    #[arg(long, short)]
    quiet: bool,

    /// Commit and push each repository after collecting
    #[arg(long, short)]
    git: bool,

    /// Concurrent jobs. Defaults to 16 per CPU.
    #[arg(long, short)]
    threads: Option<usize>,

    /// Directory for the process log and per-host logs. Defaults to stderr only.
    #[arg(long, short)]
    log_dir: Option<PathBuf>,

    /// Roster of hosts to collect
    #[arg(long = "roster", short = 'i', default_value = "etc/confcollect.toml")]
    roster: PathBuf,

    /// Print the JSON schema of the roster parameter tables and exit
    #[arg(long)]
    print_schema: bool,
}

impl Cli {
    fn level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    fn workers(&self) -> usize {
        self.threads
            .unwrap_or_else(|| available_parallelism().map_or(1, |n| n.get()) * 16)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_schema {
        let schema = serde_json::to_string_pretty(&params_schema())?;
        println!("{schema}");
        return Ok(());
    }

    init_logging(cli.level(), cli.log_dir.as_deref()).context("setting up logging")?;

    let roster = Roster::load(&cli.roster)
        .with_context(|| format!("loading roster {}", cli.roster.display()))?;
    info!("{} jobs built from {}", roster.jobs.len(), cli.roster.display());

    let dispatcher =
        Dispatcher::new(DeviceCollector, cli.workers()).with_host_logs(cli.log_dir.clone(), cli.level());
    let summary = dispatcher.run(roster.jobs).await;
    info!(
        "{} jobs processed: {} saved, {} skipped, {} failed",
        summary.total(),
        summary.succeeded,
        summary.skipped,
        summary.failed
    );

    for repo_dir in &roster.repo_dirs {
        if !cli.git {
            info!("git disabled; leaving {} alone", repo_dir.display());
            continue;
        }
        info!("checking {}", repo_dir.display());
        if let Err(err) = commit_and_push(repo_dir).await {
            error!("{}: {err}", repo_dir.display());
        }
    }
    Ok(())
}
