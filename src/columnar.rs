//! Columnar Files and Materialized Layout
//!
//! Parquet read/write helpers, and the on-disk layout the store materializes table state into:
//!
//! ```text
//! <root>/<key_prefix>/table-state/part-data/<table>/<partition>/<file>.parquet
//! ```

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, VerifyError};

pub const PARQUET_EXTENSION: &str = "parquet";

/// Write one record as a standalone parquet file, creating parent directories.
pub fn write_parquet(path: &Path, record: &RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, record.schema(), None)?;
    writer.write(record)?;
    writer.close()?;

    debug!(path = %path.display(), rows = record.num_rows(), "wrote parquet file");
    Ok(())
}

/// Read every record batch in a parquet file.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

/// Where a store keeps materialized table state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedLayout {
    pub root: PathBuf,
    pub key_prefix: String,
}

impl MaterializedLayout {
    pub fn new(root: impl Into<PathBuf>, key_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key_prefix: key_prefix.into(),
        }
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.root
            .join(&self.key_prefix)
            .join("table-state")
            .join("part-data")
            .join(table)
    }

    pub fn partition_dir(&self, table: &str, partition: u32) -> PathBuf {
        self.table_dir(table).join(partition.to_string())
    }

    /// All parquet files across every partition of `table`, sorted by path.
    ///
    /// A table that has never been written has no directory and yields no files.
    pub fn list_files(&self, table: &str) -> Result<Vec<PathBuf>> {
        let dir = self.table_dir(table);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                VerifyError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop detected")
                }))
            })?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(PARQUET_EXTENSION)
            {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}
