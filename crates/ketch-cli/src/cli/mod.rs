//! CLI for the Ketch download manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ketch_core::config;
use ketch_core::model::Priority;
use ketch_core::store::SqliteTaskStore;
use std::path::PathBuf;
use std::sync::Arc;

use commands::{run_add, run_checksum, run_engine, run_pause, run_remove, run_resume, run_status};

/// Top-level CLI for the Ketch download manager.
#[derive(Debug, Parser)]
#[command(name = "ketch")]
#[command(about = "Ketch: resumable multi-connection download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download task (queued; start it with `ketch run`).
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory where the file will be saved (default: the configured
        /// download directory). Stored with the task so resume works from
        /// any working directory.
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Parallel connections for this task.
        #[arg(long, value_name = "N")]
        connections: Option<u32>,
        /// Admission priority: low, normal, high, urgent.
        #[arg(long, value_name = "PRIORITY")]
        priority: Option<String>,
    },

    /// Run the engine until every restorable task reaches a terminal state.
    Run,

    /// Show the status of all persisted tasks.
    Status,

    /// Mark a task paused so the next `run` leaves it alone.
    Pause {
        /// Task identifier (or unique prefix).
        id: String,
    },

    /// Re-queue a paused task.
    Resume {
        /// Task identifier (or unique prefix).
        id: String,
    },

    /// Remove a task. With --delete-files, also deletes its partial and
    /// final files.
    Remove {
        /// Task identifier (or unique prefix).
        id: String,
        #[arg(long)]
        delete_files: bool,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {cfg:?}");
        let store = Arc::new(SqliteTaskStore::open_default().await?);

        match cli.command {
            CliCommand::Add {
                url,
                dir,
                connections,
                priority,
            } => {
                let priority = priority
                    .as_deref()
                    .map(parse_priority)
                    .transpose()?
                    .unwrap_or_default();
                run_add(&*store, &cfg, &url, dir, connections, priority).await?
            }
            CliCommand::Run => run_engine(cfg, store).await?,
            CliCommand::Status => run_status(&*store).await?,
            CliCommand::Pause { id } => run_pause(&*store, &id).await?,
            CliCommand::Resume { id } => run_resume(&*store, &id).await?,
            CliCommand::Remove { id, delete_files } => {
                run_remove(&*store, &id, delete_files).await?
            }
            CliCommand::Checksum { path } => run_checksum(&path)?,
        }

        Ok(())
    }
}

fn parse_priority(s: &str) -> Result<Priority> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "urgent" => Ok(Priority::Urgent),
        other => anyhow::bail!("unknown priority {other:?} (expected low|normal|high|urgent)"),
    }
}
