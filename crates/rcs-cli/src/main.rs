use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rcs_storage::PgStore;
use rcs_sync::{SyncConfig, SyncOptions, SyncReport};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rcs-cli")]
#[command(about = "Recipe catalog sync command-line interface")]
struct Cli {
    /// Debug-level logging regardless of RUST_LOG.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every sync phase once.
    Sync {
        /// Read and compare without writing anything.
        #[arg(long)]
        dry_run: bool,
        /// Stop before regenerating knowledge documents.
        #[arg(long = "skip-kb")]
        skip_knowledge_base: bool,
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete every synchronized row and published document.
    Purge {
        #[arg(long)]
        yes: bool,
    },
    /// Synced row counts, published documents and the last report.
    Status,
    Migrate,
    /// Operator HTTP API; starts the scheduler when enabled.
    Serve,
    /// Run the cron scheduler in the foreground.
    Schedule,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        skip_knowledge_base: false,
        json: false,
    }) {
        Commands::Sync {
            dry_run,
            skip_knowledge_base,
            json,
        } => {
            let engine = rcs_sync::engine_from_config(&config).await?;
            let options = SyncOptions {
                dry_run,
                skip_knowledge_base,
                on_progress: None,
            }
            .with_progress(|phase, detail| eprintln!("[{phase}] {detail}"));
            let report = engine.run_sync(options).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if !report.is_complete() {
                bail!("sync did not complete: {}", report.fatal_errors().join("; "));
            }
        }
        Commands::Purge { yes } => {
            if !yes {
                bail!("purge deletes every synchronized row; pass --yes to confirm");
            }
            let engine = rcs_sync::maintenance_engine_from_config(&config).await?;
            let report = engine.purge().await?;
            for step in &report.steps {
                println!("{:<20} {:>8} deleted", step.entity.label(), step.deleted);
            }
            println!("purge complete: {} rows", report.total());
        }
        Commands::Status => {
            let engine = rcs_sync::maintenance_engine_from_config(&config).await?;
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to the target database")?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => rcs_web::serve_from_env().await?,
        Commands::Schedule => {
            let engine = Arc::new(rcs_sync::engine_from_config(&config).await?);
            let sched = rcs_sync::build_scheduler(engine, &config.sync_cron, SyncOptions::default()).await?;
            sched.start().await.context("starting scheduler")?;
            tracing::info!(cron = %config.sync_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "run {} {}({} ms)",
        report.run_id,
        if report.dry_run { "[dry run] " } else { "" },
        report.duration_ms
    );
    for phase in &report.phases {
        println!(
            "{:<18} {:<38} {:>5} created {:>5} updated {:>5} skipped",
            phase.phase, phase.endpoint, phase.created, phase.updated, phase.skipped
        );
    }
    println!("knowledge documents: {}", report.knowledge_base_document_count);
    for err in &report.errors {
        println!("error: {err}");
    }
}
