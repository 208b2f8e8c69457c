//! Graphbulk CLI
//!
//! Runs bulk jobs against a graph snapshot file:
//! - importing and deleting models (with cascade and recreate)
//! - importing twins and relationships
//! - deleting twins by id or by query
//!
//! The job record is printed as JSON on stdout; logs go to stderr
//! (`RUST_LOG=graphbulk_engine=debug` for detail). Ctrl-C cancels the job.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use graphbulk_engine::{
    BulkRequest, CancelSignal, Collaborators, DeleteModels, DeleteTwins, ImportModels,
    ImportTwins, JobRunner,
};
use graphbulk_store::{JobRecord, JobStatus, MemoryJobStore, NoopSignals, TwinQuery};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod files;

#[derive(Parser)]
#[command(name = "graphbulk")]
#[command(author, version, about = "Graphbulk: bulk model, twin and relationship jobs")]
struct Cli {
    /// Graph snapshot (JSON); created if missing and rewritten after the job
    #[arg(long, global = true, default_value = "graph.json")]
    store: PathBuf,

    /// Engine config (JSON); defaults come from GRAPHBULK_* variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Share of the base worker count to use, 1-100
    #[arg(long, global = true)]
    concurrency: Option<u32>,

    /// User recorded on the job
    #[arg(long, global = true, default_value = "cli")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import models from a JSON file, replacing changed ones
    ImportModels {
        input: PathBuf,
        /// Replace models even when identical to the stored copy
        #[arg(long)]
        full_overlay: bool,
    },

    /// Delete models
    DeleteModels {
        #[arg(long = "id")]
        ids: Vec<String>,
        #[arg(long)]
        all: bool,
        /// Also delete models depending on the given ones
        #[arg(long)]
        include_dependencies: bool,
    },

    /// Import twins and relationships from a JSON batch
    ImportTwins {
        input: PathBuf,
        /// Remove stored relationships of the imported twins not in the batch
        #[arg(long)]
        replace_relationships: bool,
    },

    /// Delete twins and every relationship touching them
    DeleteTwins {
        #[arg(long = "id")]
        ids: Vec<String>,
        #[arg(long)]
        all: bool,
        /// Restrict --all to twins of these models
        #[arg(long = "model")]
        models: Vec<String>,
        /// Restrict --all to twins whose id or name contains this text
        #[arg(long)]
        search: Option<String>,
        /// Dotted-path filter, e.g. contents.siteID=s-1
        #[arg(long = "filter", value_parser = files::parse_filter)]
        filters: Vec<(String, String)>,
    },
}

impl Commands {
    fn into_request(self) -> Result<BulkRequest> {
        Ok(match self {
            Commands::ImportModels {
                input,
                full_overlay,
            } => BulkRequest::ImportModels(ImportModels {
                models: files::load_models(&input)?,
                full_overlay,
            }),
            Commands::DeleteModels {
                ids,
                all,
                include_dependencies,
            } => {
                if ids.is_empty() && !all {
                    return Err(anyhow!("pass --id or --all"));
                }
                BulkRequest::DeleteModels(DeleteModels {
                    model_ids: ids,
                    delete_all: all,
                    include_dependencies,
                })
            }
            Commands::ImportTwins {
                input,
                replace_relationships,
            } => {
                let batch = files::load_twin_batch(&input)?;
                BulkRequest::ImportTwins(ImportTwins {
                    twins: batch.twins,
                    relationships: batch.relationships,
                    replace_relationships,
                })
            }
            Commands::DeleteTwins {
                ids,
                all,
                models,
                search,
                filters,
            } => {
                if ids.is_empty() && !all {
                    return Err(anyhow!("pass --id or --all"));
                }
                BulkRequest::DeleteTwins(DeleteTwins {
                    twin_ids: ids,
                    delete_all: all,
                    query: TwinQuery {
                        model_ids: models,
                        search,
                    },
                    filters: filters.into_iter().collect(),
                })
            }
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let record = runtime.block_on(run(cli))?;

    if record.status == JobStatus::Error {
        return Err(anyhow!(
            "job {} failed: {}",
            record.job_id,
            record.errors_by_id.get("job").cloned().unwrap_or_default()
        ));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<JobRecord> {
    let mut config = files::load_config(cli.config.as_deref())?;
    if let Some(percent) = cli.concurrency {
        config = config.with_concurrency_percent(percent);
    }

    let store = Arc::new(files::load_store(&cli.store)?);
    let jobs = Arc::new(MemoryJobStore::new());
    let ctx = Collaborators::in_memory(Arc::clone(&store), jobs, Arc::new(NoopSignals));
    let runner = JobRunner::new(ctx, config);
    let request = cli.command.into_request()?;

    let cancel = CancelSignal::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} cancelling, restoring state...", "interrupt".yellow().bold());
                cancel.cancel();
            }
        })
    };

    let record = runner.submit(&cli.user, request, cancel).await?;
    interrupt.abort();

    files::save_store(&cli.store, &store.snapshot())?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    report(&record);
    Ok(record)
}

fn report(record: &JobRecord) {
    let status = match record.status {
        JobStatus::Done => "done".green().bold(),
        JobStatus::Canceled => "cancelled".yellow().bold(),
        JobStatus::Error => "error".red().bold(),
        JobStatus::Queued | JobStatus::Processing => "unfinished".normal(),
    };
    eprintln!(
        "{} {} ({}/{} processed, {} errors)",
        status,
        record.job_id.bold(),
        record.current_count,
        record.total_count,
        record.errors_by_id.len()
    );
}
