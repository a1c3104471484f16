//! Partition Inspect Binary
//!
//! Prints the rows of materialized partition files. Either point it at one parquet file, or at a
//! table (optionally one partition) under a storage root.
//!
//! Usage:
//!   partition_inspect --file warehouse_data/chdb/table-state/part-data/table1/3/d_12_0.parquet
//!   partition_inspect --table table1 --partition 3 --limit 20

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use ingest_verifier::columnar::{read_parquet, MaterializedLayout};
use ingest_verifier::dataset::Schema;
use ingest_verifier::encode::decode;

#[derive(Parser, Debug)]
#[command(name = "partition_inspect")]
#[command(about = "Print rows from materialized partition files")]
struct Args {
    /// Single parquet file to print
    #[arg(long, conflicts_with = "table")]
    file: Option<PathBuf>,

    /// Table whose materialized files to print
    #[arg(long)]
    table: Option<String>,

    /// Restrict to one partition of --table
    #[arg(long, requires = "table")]
    partition: Option<u32>,

    #[arg(long, env = "VERIFY_STORAGE_ROOT", default_value = "warehouse_data")]
    storage_root: PathBuf,

    #[arg(long, default_value = "chdb")]
    key_prefix: String,

    /// Maximum rows printed per file (0 = all)
    #[arg(long, default_value = "0")]
    limit: usize,
}

fn print_file(path: &std::path::Path, limit: usize) -> Result<usize> {
    let records = read_parquet(path).with_context(|| format!("reading {}", path.display()))?;
    let mut printed = 0usize;
    let mut total = 0usize;
    let mut header_done = false;

    println!("== {}", path.display());
    for record in &records {
        let schema = Schema::from_arrow(&record.schema())?;
        if !header_done {
            header_done = true;
            let header: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
            println!("{}", header.join("\t"));
        }
        for row in decode(record, &schema)? {
            total += 1;
            if limit > 0 && printed >= limit {
                continue;
            }
            let cells: Vec<String> = row.values().iter().map(|v| v.to_string()).collect();
            println!("{}", cells.join("\t"));
            printed += 1;
        }
    }
    println!("({} rows)", total);
    Ok(total)
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .init();

    let args = Args::parse();

    let files = match (&args.file, &args.table) {
        (Some(file), _) => vec![file.clone()],
        (None, Some(table)) => {
            let layout = MaterializedLayout::new(&args.storage_root, &args.key_prefix);
            let mut files = layout.list_files(table)?;
            if let Some(partition) = args.partition {
                let dir = layout.partition_dir(table, partition);
                files.retain(|f| f.starts_with(&dir));
            }
            files
        }
        (None, None) => anyhow::bail!("pass --file or --table"),
    };

    let mut rows = 0usize;
    for file in &files {
        rows += print_file(file, args.limit)?;
    }
    info!(files = files.len(), rows, "inspection complete");
    Ok(())
}
