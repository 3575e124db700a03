//! Importer Service - Loads government facility CSV files into Postgres
//!
//! Responsibilities:
//! - Stream hospital/clinic facility files and their department-hours files
//! - Merge multi-row department data into one record per (facility, code)
//! - Skip rows already stored (insert-only tables) or upsert (hospitals)
//! - Record every live run in import_runs with the source file hash
//!
//! Re-running an import with the same file writes nothing new.

mod aggregate;
mod batch;
mod config;
mod csv_source;
mod error;
mod keys;
mod normalize;
mod pipeline;
mod records;
mod runs;
mod schedule;
mod search;
mod store;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{EntityKind, Settings};
use crate::pipeline::ImportSummary;
use crate::runs::RunStatus;
use crate::store::PgStore;

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports hospital and clinic CSV files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Rows per bulk write (default: IMPORT_BATCH_SIZE or 1000)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Rows per key-loading page (default: IMPORT_PAGE_SIZE or 1000)
    #[arg(long)]
    page_size: Option<usize>,

    /// Dry run - load keys and aggregate, don't write
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Don't record the run in import_runs
    #[arg(long, default_value = "false")]
    no_record: bool,
}

#[derive(Args, Debug, Clone)]
struct EntityArgs {
    /// CSV file to import (default: the published file name under IMPORT_DATA_DIR)
    #[arg(long)]
    csv: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upsert hospitals by government ID
    Hospital(EntityArgs),
    /// Insert clinics not yet stored
    Clinic(EntityArgs),
    /// Insert hospital departments with merged opening hours
    HospitalDepartment(EntityArgs),
    /// Insert clinic departments with merged opening hours
    ClinicDepartment(EntityArgs),
    /// Run all four imports in dependency order
    All(RunArgs),
    /// Search facility CSV files for a name keyword
    Search {
        keyword: String,
        /// Files to search (default: the hospital and clinic facility files)
        files: Vec<PathBuf>,
    },
    /// Apply database migrations
    Migrate,
}

async fn connect(settings: &Settings) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(settings.db_url()?)
        .await
        .context("Failed to connect to database")
}

/// Runs one import, recording it in import_runs unless told not to.
async fn run_entity(
    pool: &PgPool,
    settings: &Settings,
    kind: EntityKind,
    csv: Option<PathBuf>,
    args: &RunArgs,
) -> Result<ImportSummary> {
    let source = csv.unwrap_or_else(|| settings.default_source(kind));
    let config = settings.import_config(&source, args.batch_size, args.page_size, args.dry_run);
    let started = Utc::now();

    println!("\n=== Import: {} ===", kind);
    println!("Source: {}", source.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });
    println!("Batch size: {}", config.batch_size);

    let run_id = if args.dry_run || args.no_record {
        None
    } else {
        let hash = match runs::sha256_file(&source) {
            Ok(hash) => {
                println!("Hash: {}", hash);
                Some(hash)
            }
            Err(e) => {
                warn!(error = %e, "source file not hashed");
                None
            }
        };
        Some(runs::start_run(pool, kind, &source, hash.as_deref()).await?)
    };

    let store = PgStore::new(pool.clone());
    match pipeline::run_import(&store, kind, &config).await {
        Ok(summary) => {
            if let Some(run_id) = run_id {
                runs::finish_run(pool, run_id, RunStatus::Completed, None, Some(&summary)).await?;
            }
            println!("\n{}", summary);
            println!(
                "Elapsed: {:.1}s",
                (Utc::now() - started).num_milliseconds() as f64 / 1000.0
            );
            Ok(summary)
        }
        Err(e) => {
            error!(entity = %kind, step = %e.step(), "{}", e);
            if let Some(run_id) = run_id {
                let message = e.to_string();
                runs::finish_run(pool, run_id, RunStatus::Aborted, Some(&message), None).await?;
            }
            Err(e).with_context(|| format!("{} import aborted", kind))
        }
    }
}

fn run_search(settings: &Settings, keyword: &str, files: Vec<PathBuf>) {
    let files = if files.is_empty() {
        vec![
            settings.default_source(EntityKind::Hospital),
            settings.default_source(EntityKind::Clinic),
        ]
    } else {
        files
    };

    println!("=== Search: \"{}\" ===", keyword);
    let report = search::search_files(&files, keyword);

    for path in &report.missing {
        println!("Not found: {}", path.display());
    }
    for (path, err) in &report.failed {
        println!("Failed: {} ({})", path.display(), err);
    }
    for (i, hit) in report.hits.iter().enumerate() {
        println!("{}. {}", i + 1, hit.name);
        println!("   Address: {}", hit.address);
        println!("   Prefecture code: {}", hit.prefecture);
        println!("   ID: {}", hit.id);
        println!("   File: {} (row {})", hit.file.display(), hit.row);
    }
    println!("\nTotal: {}", report.hits.len());
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let (kind, args) = match cli.command {
        Command::Search { keyword, files } => {
            run_search(&settings, &keyword, files);
            return Ok(());
        }
        Command::Migrate => {
            let pool = connect(&settings).await?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            println!("Migrations applied");
            return Ok(());
        }
        Command::All(args) => {
            let pool = connect(&settings).await?;
            println!("=== Importing all entities ===");
            let mut written = 0;
            for kind in EntityKind::IMPORT_ORDER {
                written += run_entity(&pool, &settings, kind, None, &args).await?.written;
            }
            println!("\n=== All imports completed: {} rows written ===", written);
            return Ok(());
        }
        Command::Hospital(args) => (EntityKind::Hospital, args),
        Command::Clinic(args) => (EntityKind::Clinic, args),
        Command::HospitalDepartment(args) => (EntityKind::HospitalDepartment, args),
        Command::ClinicDepartment(args) => (EntityKind::ClinicDepartment, args),
    };

    let pool = connect(&settings).await?;
    run_entity(&pool, &settings, kind, args.csv, &args.run).await?;
    Ok(())
}
