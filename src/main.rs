use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coach_maintenance::config::Config;
use coach_maintenance::procedures::{
    copy_namespace, dedupe_memories, delete_user_records, CopyRequest, PurgeRequest, RunOptions,
};
use coach_maintenance::reconcile::{ConfirmMode, ConfirmationGate, RecordFilter, RunReport, StdinInput};
use coach_maintenance::store::{TableStore, VectorIndexStore};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coach-maintenance")]
#[command(about = "Bulk record maintenance for the coaching platform's vector index and record table")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Plan and report without changing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long, global = true)]
    auto_confirm: bool,

    /// Log each page, batch and duplicate group
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Exit with status 1 if any record failed to mutate
    #[arg(long, global = true)]
    strict: bool,

    /// Records per mutation batch (overrides BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Delay between batches in milliseconds (overrides INTER_BATCH_DELAY_MS)
    #[arg(long, global = true)]
    delay_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove duplicate memories from a vector namespace
    DedupeMemories {
        /// Vector namespace to clean
        namespace: String,
    },
    /// Copy records from one vector namespace into another
    CopyNamespace {
        /// Namespace to read from
        source: String,
        /// Namespace to write to
        target: String,
        /// Only copy these categories (comma-separated)
        #[arg(long)]
        include_types: Option<String>,
        /// Never copy these categories (comma-separated)
        #[arg(long)]
        exclude_types: Option<String>,
        /// Leave records already present in the target untouched
        #[arg(long)]
        skip_existing: bool,
    },
    /// Delete a user's records from the record table
    DeleteUserRecords {
        /// User id (table partition key)
        user_id: String,
        /// Only delete these categories (comma-separated)
        #[arg(long)]
        include_types: Option<String>,
        /// Never delete these categories (comma-separated)
        #[arg(long)]
        exclude_types: Option<String>,
        /// Only delete records logged within the last N weeks
        #[arg(long)]
        weeks: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env()
        .and_then(|c| c.with_batch_overrides(cli.run.batch_size, cli.run.delay_ms))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let default_filter = if cli.run.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    let options = RunOptions::new(
        ConfirmMode::from_flags(cli.run.dry_run, cli.run.auto_confirm),
        config.batch,
    );
    let mut gate = ConfirmationGate::new(StdinInput);

    let report = match cli.command {
        Commands::DedupeMemories { namespace } => {
            let store = VectorIndexStore::new(config.require_vector_store()?.clone())?;
            dedupe_memories(&store, &namespace, &options, &mut gate).await?
        }
        Commands::CopyNamespace {
            source,
            target,
            include_types,
            exclude_types,
            skip_existing,
        } => {
            let store = VectorIndexStore::new(config.require_vector_store()?.clone())?;
            let request = CopyRequest {
                source,
                target,
                filter: RecordFilter::from_lists(include_types.as_deref(), exclude_types.as_deref()),
                skip_existing,
            };
            copy_namespace(&store, &store, &request, &options, &mut gate).await?
        }
        Commands::DeleteUserRecords {
            user_id,
            include_types,
            exclude_types,
            weeks,
        } => {
            let table = config.require_table_store()?;
            info!(database = %config.safe_database_url().unwrap_or_default(), "Connecting to record table");
            let store = TableStore::connect(table)
                .await
                .context("Failed to connect to record table")?;
            let request = PurgeRequest {
                user_id,
                filter: RecordFilter::from_lists(include_types.as_deref(), exclude_types.as_deref()),
                weeks,
            };
            delete_user_records(&store, &request, &options, &mut gate).await?
        }
    };

    print_report(&report, cli.run.json, cli.run.verbose)?;

    if cli.run.strict {
        report.into_strict()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RunReport, json: bool, verbose: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if report.is_approximate() {
        warn!("Enumeration used a query sweep; records outside every probe's top-k were not seen");
    }

    println!("{} ({})", report.procedure, report.scope);
    println!("  mode:        {}", report.mode);
    println!("  enumerated:  {}", report.enumerated);
    if !report.groups.is_empty() {
        println!("  dup groups:  {}", report.groups.len());
    }
    println!("  planned:     {}", report.planned);

    if verbose {
        for group in &report.groups {
            println!(
                "    {} keep={} delete=[{}]",
                group.group_key,
                group.keep,
                group.delete.join(", ")
            );
        }
    }

    if !report.executed {
        match report.mode {
            ConfirmMode::DryRun if report.planned > 0 => {
                println!("  dry run: nothing changed");
                if verbose {
                    for id in &report.planned_ids {
                        println!("    {id}");
                    }
                }
            }
            _ if report.planned > 0 => println!("  cancelled: nothing changed"),
            _ => println!("  nothing to do"),
        }
        return Ok(());
    }

    println!("  succeeded:   {}", report.result.succeeded);
    println!("  failed:      {}", report.result.failed);
    for error in &report.result.errors {
        println!("    {}: {}", error.id, error.message);
    }
    Ok(())
}
