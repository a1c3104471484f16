//! Comparison snapshot: the oracle's replayed rows persisted as one parquet file per batch.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::columnar::write_parquet;
use crate::dataset::{Dataset, Schema};
use crate::encode::encode;
use crate::error::Result;

/// Reset `dataset` and drain it into `dir` as `d<idx>.parquet`, one file per batch.
///
/// Returns the written paths in batch order and the total row count.
pub fn write_dataset_files<D>(dataset: &mut D, dir: &Path) -> Result<(Vec<PathBuf>, usize)>
where
    D: Dataset + ?Sized,
{
    dataset.reset();
    let schema = dataset.schema().clone();

    let mut files = Vec::new();
    let mut rows = 0usize;
    let mut idx = 0usize;
    while !dataset.is_done() {
        let batch = dataset.next_batch()?;
        let record = encode(&batch, &schema)?;
        let path = dir.join(format!("d{}.parquet", idx));
        write_parquet(&path, &record)?;

        rows += batch.len();
        files.push(path);
        idx += 1;
    }

    debug!(dir = %dir.display(), files = files.len(), rows, "dataset written");
    Ok((files, rows))
}

/// Snapshot files live in a temporary directory removed when the snapshot is dropped.
pub struct Snapshot {
    dir: TempDir,
    files: Vec<PathBuf>,
    rows: usize,
    schema: Schema,
}

impl Snapshot {
    /// Build under the system temp directory.
    pub fn build<D: Dataset + ?Sized>(dataset: &mut D) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("oracle-snapshot").tempdir()?;
        Self::build_into(dataset, dir)
    }

    /// Build under `parent`, which must exist.
    pub fn build_in<D: Dataset + ?Sized>(dataset: &mut D, parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("oracle-snapshot")
            .tempdir_in(parent)?;
        Self::build_into(dataset, dir)
    }

    fn build_into<D: Dataset + ?Sized>(dataset: &mut D, dir: TempDir) -> Result<Self> {
        let (files, rows) = write_dataset_files(dataset, dir.path())?;
        info!(
            dir = %dir.path().display(),
            files = files.len(),
            rows,
            "oracle snapshot built"
        );
        Ok(Self {
            dir,
            files,
            rows,
            schema: dataset.schema().clone(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}
