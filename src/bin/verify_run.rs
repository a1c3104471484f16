//! Verify Run Binary
//!
//! End-to-end verification against the local warehouse: insert a synthetic dataset into every
//! selected table, wait for the processing queue to drain, then validate each table against a
//! replayed oracle.
//!
//! Usage:
//!   verify_run --tables table1,table2 --storage-root ./warehouse_data
//!
//! Environment:
//!   VERIFY_CONFIG_PATH - TOML run config (default: verify_config.toml, optional)
//!   VERIFY_TABLES - Comma-separated tables (default: table1,table2)
//!   VERIFY_DRAIN_TIMEOUT_SECS - Upper bound on the drain wait (default: 600)
//!   VERIFY_* - Dataset/driver/drain overrides, see RunConfig

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use ingest_verifier::driver::DriverReport;
use ingest_verifier::local_warehouse::LocalWarehouse;
use ingest_verifier::{
    run_insertion, validate_in_background, wait_for_drain, RandomDataset, RunConfig, TableDef,
    TableRegistry, ValidationReport,
};

#[derive(Parser, Debug)]
#[command(name = "verify_run")]
#[command(about = "Insert synthetic data, wait for drain, validate materialized state")]
struct Args {
    /// TOML run config; falls back to VERIFY_CONFIG_PATH and env overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tables to exercise (comma-separated)
    #[arg(long, env = "VERIFY_TABLES", default_value = "table1,table2")]
    tables: String,

    /// Override the storage root from the config
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Upper bound on the drain wait in seconds
    #[arg(long, env = "VERIFY_DRAIN_TIMEOUT_SECS", default_value = "600")]
    drain_timeout_secs: u64,

    /// Keep materialized files from earlier runs instead of clearing them
    #[arg(long)]
    keep_existing: bool,
}

#[derive(Debug, Serialize)]
struct TableOutcome {
    table: String,
    insertion: DriverReport,
    passed: bool,
    report: Option<ValidationReport>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("ingest_verifier=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading run config {}", path.display()))?,
        None => RunConfig::from_env(),
    };
    if let Some(root) = &args.storage_root {
        config.storage.root = root.clone();
    }

    let registry = TableRegistry::standard()?;
    let tables: Vec<TableDef> = args
        .tables
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| registry.get_table(name).cloned())
        .collect::<std::result::Result<_, _>>()?;
    if tables.is_empty() {
        anyhow::bail!("no tables selected");
    }

    let layout = config.storage.layout();
    if !args.keep_existing {
        for table in &tables {
            let dir = layout.table_dir(&table.name);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
                    .with_context(|| format!("clearing {}", dir.display()))?;
                info!(table = %table.name, "cleared previous materialized state");
            }
        }
    }

    info!("Starting verification run");
    info!("  Tables: {}", args.tables);
    info!("  Storage: {}", layout.table_dir("<table>").display());
    info!(
        "  Dataset: {} rows x {} iterations, keys < {}, seed {}",
        config.dataset.rows_per_batch,
        config.dataset.max_iterations,
        config.dataset.max_key_value,
        config.dataset.seed
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let (warehouse, worker) = LocalWarehouse::start(
        registry.clone(),
        layout.clone(),
        config.warehouse.clone(),
        cancel.clone(),
    );

    // ===== INSERTION =====

    let mut inserts = Vec::new();
    for table in &tables {
        let mut dataset = RandomDataset::new(config.dataset.clone(), table.key_format()?)?;
        let warehouse = Arc::clone(&warehouse);
        let table = table.clone();
        let driver = config.driver.clone();
        let cancel = cancel.clone();
        inserts.push(tokio::spawn(async move {
            run_insertion(&cancel, &mut dataset, warehouse.as_ref(), &table, &driver).await
        }));
    }

    let mut insertions = Vec::new();
    for handle in inserts {
        insertions.push(handle.await.context("insertion task panicked")??);
    }

    // ===== DRAIN =====

    let drain = tokio::time::timeout(
        Duration::from_secs(args.drain_timeout_secs),
        wait_for_drain(&cancel, warehouse.as_ref(), &config.drain),
    )
    .await
    .context("timed out waiting for the processing queue to drain")??;
    info!(polls = drain.polls, max_depth = drain.max_depth_seen, "drain complete");

    // ===== VALIDATION =====

    let mut outcomes = Vec::new();
    for (table, insertion) in tables.iter().zip(insertions) {
        let oracle = RandomDataset::new(config.dataset.clone(), table.key_format()?)?;
        let result = validate_in_background(&cancel, oracle, table.clone(), layout.clone()).await;
        let outcome = match result {
            Ok(report) => TableOutcome {
                table: table.name.clone(),
                insertion,
                passed: true,
                report: Some(report),
                error: None,
            },
            Err(e) if e.is_validation_failure() => {
                error!(table = %table.name, error = %e, "table failed validation");
                TableOutcome {
                    table: table.name.clone(),
                    insertion,
                    passed: false,
                    report: None,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => return Err(e).with_context(|| format!("validating {}", table.name)),
        };
        outcomes.push(outcome);
    }

    cancel.cancel();
    let stats = worker.await.context("warehouse worker panicked")?;
    info!(
        processed = stats.records_processed,
        failed = stats.records_failed,
        "warehouse stopped"
    );

    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    if outcomes.iter().any(|o| !o.passed) {
        anyhow::bail!("verification failed");
    }
    info!("verification passed");
    Ok(())
}
