//! Snapshot Dump Binary
//!
//! Writes the oracle dataset for a table into a directory as `d<idx>.parquet`, one file per
//! batch. Useful for inspecting exactly what a verification run submits.
//!
//! Usage:
//!   snapshot_dump --table table2 --out ./snapshot

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use ingest_verifier::oracle::write_dataset_files;
use ingest_verifier::{DatasetParams, RandomDataset, TableRegistry};

#[derive(Parser, Debug)]
#[command(name = "snapshot_dump")]
#[command(about = "Write a synthetic dataset to a directory of parquet files")]
struct Args {
    /// Table whose source schema the dataset follows
    #[arg(long, default_value = "table1")]
    table: String,

    /// Output directory (created if missing)
    #[arg(long, default_value = "snapshot")]
    out: PathBuf,

    #[arg(long, env = "VERIFY_ROWS_PER_BATCH", default_value = "1000")]
    rows_per_batch: usize,

    #[arg(long, env = "VERIFY_MAX_KEY_VALUE", default_value = "100000")]
    max_key_value: u32,

    #[arg(long, env = "VERIFY_MAX_ITERATIONS", default_value = "10")]
    max_iterations: usize,

    #[arg(long, env = "VERIFY_SEED", default_value = "64")]
    seed: u64,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("ingest_verifier=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let registry = TableRegistry::standard()?;
    let table = registry.get_table(&args.table)?;

    let params = DatasetParams {
        rows_per_batch: args.rows_per_batch,
        max_key_value: args.max_key_value,
        max_iterations: args.max_iterations,
        seed: args.seed,
    };
    let mut dataset = RandomDataset::new(params, table.key_format()?)?;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    let (files, rows) = write_dataset_files(&mut dataset, &args.out)?;

    info!(
        table = %table.name,
        out = %args.out.display(),
        files = files.len(),
        rows,
        "snapshot written"
    );
    for file in &files {
        println!("{}", file.display());
    }
    Ok(())
}
