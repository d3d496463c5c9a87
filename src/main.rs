use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info};

use knowever::logging::configure_logging;
use knowever::pipeline::{self, RunOutcome};
use knowever::{Config, Paths, TARGET_PIPELINE};

#[derive(Parser)]
#[clap(name = "knowever", about = "RSS -> AI -> mail pipeline CLI")]
struct Cli {
    /// Less logging
    #[clap(long, global = true)]
    quiet: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download RSS feeds into feeds/
    Download,
    /// Process candidates into daily_buffer
    Process,
    /// Send digest or individual emails
    Send,
    /// Full pipeline + day.lock
    Run,
    /// Clear domain error cache
    PurgeCache,
    /// Mark all entries in feeds/ as processed (add to history)
    MarkAll,
    /// Show today's buffer
    ShowBuffer {
        /// How many lines to show
        #[clap(long, default_value = "5")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = match Paths::detect() {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("Execution error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = paths.ensure_dirs() {
        eprintln!("Execution error: {:#}", err);
        return ExitCode::FAILURE;
    }
    let _guard = configure_logging(&paths.logs_dir, cli.quiet);

    match execute(cli.command, &paths).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: TARGET_PIPELINE, "Execution error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, paths: &Paths) -> Result<()> {
    match command {
        Commands::Download => {
            let cfg = Config::load(&paths.root)?;
            pipeline::download(paths, &cfg).await?;
        }
        Commands::Process => {
            let cfg = Config::load(&paths.root)?;
            pipeline::process(paths, &cfg).await?;
        }
        Commands::Send => {
            let cfg = Config::load(&paths.root)?;
            let report = pipeline::send(paths, &cfg).await?;
            info!(target: TARGET_PIPELINE, "Sent {} entries, pruned {}", report.sent, report.pruned);
        }
        Commands::Run => {
            let cfg = Config::load(&paths.root)?;
            match pipeline::run(paths, &cfg).await? {
                RunOutcome::AlreadyRan(day) => {
                    println!("[rss] day.lock={} - already ran today, skipping.", day)
                }
                RunOutcome::Completed(day) => println!("[rss] Saved day.lock = {}", day),
            }
        }
        Commands::PurgeCache => {
            if pipeline::purge_cache(paths)? {
                println!("Cleared domain error cache (fail_cache).");
            } else {
                println!("No fail_cache file to remove.");
            }
        }
        Commands::MarkAll => {
            let (added, total) = pipeline::mark_all(paths)?;
            println!("Added {} IDs (checked {} entries).", added, total);
        }
        Commands::ShowBuffer { limit } => match pipeline::show_buffer(paths, limit)? {
            Some(preview) => {
                println!("Entries in buffer: {}", preview.total);
                for line in preview.lines {
                    println!("{}", line);
                }
            }
            None => println!("daily_buffer.jsonl not found"),
        },
    }
    Ok(())
}
