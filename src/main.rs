//! tablesync command-line client

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tablesync::config::{JobsFile, SyncConfig};
use tablesync::error::SyncError;
use tablesync::service::SyncService;
use tablesync::sync::DEFAULT_MAX_TABLES;

/// Copy tables between two databases, once or on a schedule
#[derive(Parser, Debug)]
#[command(name = "tablesync")]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Role {
    Source,
    Destination,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Test both database connections
    Health,

    /// Summarize the tables of one database
    Tables {
        #[arg(long, value_enum, default_value = "source")]
        role: Role,

        /// Order tables so referenced tables come first
        #[arg(long)]
        ordered: bool,
    },

    /// Compare source and destination table by table
    Compare,

    /// Migrate one table
    Migrate {
        table: String,

        /// Replace the table if it already exists at the destination
        #[arg(long)]
        overwrite: bool,
    },

    /// Migrate tables in dependency order
    MigrateBatch {
        #[arg(long)]
        overwrite: bool,

        #[arg(long, default_value_t = DEFAULT_MAX_TABLES)]
        max_tables: usize,
    },

    /// Register recurring jobs and run until interrupted
    Daemon {
        /// Jobs file (defaults to ~/.config/tablesync/jobs.toml)
        #[arg(long)]
        jobs: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<SyncError>() {
            Some(sync_err) => eprintln!("Error [{}]: {:#}", sync_err.kind(), e),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "tablesync=debug,sqlx=debug"
    } else {
        "tablesync=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = SyncConfig::from_env()?;
    init_logging(config.debug);
    tracing::info!(
        "tablesync {} ({} source {}:{}/{}, destination {}:{}/{})",
        env!("CARGO_PKG_VERSION"),
        config.database_type,
        config.source.host,
        config.source.port,
        config.source.database,
        config.destination.host,
        config.destination.port,
        config.destination.database
    );

    let service = SyncService::connect(&config)
        .await
        .context("Failed to connect to the configured databases")?;

    match cli.command {
        Command::Health => {
            let status = service.health().await;
            print_json(&status)?;
            if !status.is_healthy() {
                anyhow::bail!("at least one database is unreachable");
            }
        }
        Command::Tables { role, ordered } => {
            let summary = match role {
                Role::Source => service.source_summary(ordered).await?,
                Role::Destination => service.destination_summary(ordered).await?,
            };
            print_json(&summary)?;
        }
        Command::Compare => {
            print_json(&service.compare().await?)?;
        }
        Command::Migrate { table, overwrite } => {
            let result = service.migrate_table(&table, overwrite).await;
            print_json(&result)?;
            if !result.success {
                match result.error_kind {
                    Some(kind) => anyhow::bail!("migration failed ({})", kind),
                    None => anyhow::bail!("migration failed"),
                }
            }
        }
        Command::MigrateBatch { overwrite, max_tables } => {
            let result = service.migrate_batch(overwrite, max_tables).await?;
            print_json(&result)?;
        }
        Command::Daemon { jobs } => run_daemon(&service, jobs).await?,
    }

    Ok(())
}

async fn run_daemon(service: &SyncService, jobs: Option<PathBuf>) -> Result<()> {
    let file = JobsFile::load(jobs.as_deref())?;
    if file.jobs.is_empty() {
        tracing::warn!("no jobs configured; the daemon will idle until interrupted");
    }

    for request in file.jobs {
        let name = request.name.clone();
        let job = service
            .create_job(request)
            .await
            .with_context(|| format!("Failed to register job '{}'", name))?;
        tracing::info!("job '{}' scheduled, next run {:?}", job.name, job.next_run);
    }
    tracing::info!("{} jobs registered", service.job_count().await);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("shutdown requested");
    service.shutdown().await;
    print_json(&service.list_jobs().await)?;
    Ok(())
}
