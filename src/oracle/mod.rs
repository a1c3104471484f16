//! Oracle & Validator
//!
//! Replays the dataset that was fed to the store, persists it as a comparison snapshot, and
//! checks the store's materialized output against it:
//! 1. uniqueness: no key has more than one materialized row
//! 2. latest value: every materialized row equals the top-ranked snapshot row for its key, and
//!    every expected key is present
//!
//! The first failing check is returned as the error; success yields a [`ValidationReport`].

pub mod engine;
pub mod snapshot;

pub use engine::{ComparisonEngine, MatchCounts};
pub use snapshot::{write_dataset_files, Snapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::columnar::MaterializedLayout;
use crate::dataset::Dataset;
use crate::error::{Result, VerifyError};
use crate::tables::TableDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub table: String,
    pub snapshot_files: usize,
    pub snapshot_rows: usize,
    /// Distinct keys in the snapshot.
    pub expected_rows: usize,
    pub materialized_files: usize,
    pub materialized_rows: usize,
    pub validated_at: DateTime<Utc>,
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(VerifyError::Cancelled);
    }
    Ok(())
}

/// Validate the materialized state of `table` against a replay of `oracle`.
///
/// `oracle` must be configured exactly like the dataset the driver consumed; it is reset before
/// use. Cancellation is checked between steps.
pub fn validate<D>(
    cancel: &CancellationToken,
    oracle: &mut D,
    table: &TableDef,
    layout: &MaterializedLayout,
) -> Result<ValidationReport>
where
    D: Dataset + ?Sized,
{
    ensure_running(cancel)?;
    if oracle.schema() != &table.source_schema {
        return Err(VerifyError::SchemaMismatch(format!(
            "oracle schema does not match source schema of {}",
            table.name
        )));
    }

    let snapshot = Snapshot::build(oracle)?;
    ensure_running(cancel)?;

    let mut engine = ComparisonEngine::new(table)?;
    let snapshot_rows = engine.load_snapshot_files(snapshot.files())?;

    let materialized = layout.list_files(&table.name)?;
    let materialized_rows = engine.load_materialized_files(&materialized)?;
    ensure_running(cancel)?;

    info!(
        table = %table.name,
        snapshot_rows,
        materialized_files = materialized.len(),
        materialized_rows,
        "comparing materialized output with oracle"
    );

    let outcome = engine
        .check_uniqueness()
        .and_then(|_| engine.check_latest_values());
    if let Err(e) = outcome {
        warn!(table = %table.name, error = %e, "validation failed");
        return Err(e);
    }

    let report = ValidationReport {
        table: table.name.clone(),
        snapshot_files: snapshot.files().len(),
        snapshot_rows,
        expected_rows: engine.expected_rows()?,
        materialized_files: materialized.len(),
        materialized_rows,
        validated_at: Utc::now(),
    };
    info!(table = %table.name, rows = report.materialized_rows, "validation passed");
    Ok(report)
}

/// Run [`validate`] on the blocking pool, returning `Cancelled` as soon as `cancel` fires.
///
/// The abandoned validation keeps running on its thread until its next cancellation check.
pub async fn validate_in_background<D>(
    cancel: &CancellationToken,
    mut oracle: D,
    table: TableDef,
    layout: MaterializedLayout,
) -> Result<ValidationReport>
where
    D: Dataset + 'static,
{
    let task = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || validate(&cancel, &mut oracle, &table, &layout))
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(VerifyError::Cancelled),
        joined = task => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(VerifyError::Cancelled),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::write_parquet;
    use crate::dataset::{DatasetParams, KeyFormat, RandomDataset, Row};
    use crate::encode::encode_rows;
    use crate::tables::table1;

    fn dataset() -> RandomDataset {
        RandomDataset::new(
            DatasetParams {
                rows_per_batch: 20,
                max_key_value: 5000,
                max_iterations: 3,
                seed: 5,
            },
            KeyFormat::Int32,
        )
        .unwrap()
    }

    /// Writes the dataset's own rows, projected, as a single materialized file.
    fn materialize_perfectly(layout: &MaterializedLayout) {
        let table = table1();
        let mut ds = dataset();
        let mut rows = Vec::new();
        while !ds.is_done() {
            rows.extend(ds.next_batch().unwrap().rows);
        }
        let stored: Vec<Row> = rows
            .into_iter()
            .map(|r| Row(r.0.into_iter().take(3).collect()))
            .collect();
        let record = encode_rows(&stored, &table.stored_schema().unwrap()).unwrap();
        write_parquet(&layout.partition_dir("table1", 0).join("d_1_0.parquet"), &record).unwrap();
    }

    #[test]
    fn test_validate_passes_on_faithful_store() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MaterializedLayout::new(dir.path(), "chdb");
        materialize_perfectly(&layout);

        let report = validate(&CancellationToken::new(), &mut dataset(), &table1(), &layout).unwrap();
        assert_eq!(report.snapshot_files, 3);
        assert_eq!(report.snapshot_rows, 60);
        assert_eq!(report.expected_rows, 60);
        assert_eq!(report.materialized_rows, 60);
    }

    #[test]
    fn test_empty_store_reports_every_row_missing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MaterializedLayout::new(dir.path(), "chdb");

        let err = validate(&CancellationToken::new(), &mut dataset(), &table1(), &layout).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Mismatch {
                count: 60,
                unexpected: 0,
                missing: 60
            }
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MaterializedLayout::new(dir.path(), "chdb");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = validate(&cancel, &mut dataset(), &table1(), &layout).unwrap_err();
        assert!(matches!(err, VerifyError::Cancelled));
    }

    /// Replays `RandomDataset` but stalls on reset.
    struct StallingDataset {
        inner: RandomDataset,
        stall: std::time::Duration,
    }

    impl Dataset for StallingDataset {
        fn schema(&self) -> &crate::dataset::Schema {
            self.inner.schema()
        }

        fn is_done(&self) -> bool {
            self.inner.is_done()
        }

        fn reset(&mut self) {
            std::thread::sleep(self.stall);
            self.inner.reset();
        }

        fn next_batch(&mut self) -> Result<crate::dataset::Batch> {
            self.inner.next_batch()
        }

        fn rows_emitted(&self) -> usize {
            self.inner.rows_emitted()
        }
    }

    #[tokio::test]
    async fn test_background_validation_returns_report() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MaterializedLayout::new(dir.path(), "chdb");
        materialize_perfectly(&layout);

        let report = validate_in_background(&CancellationToken::new(), dataset(), table1(), layout)
            .await
            .unwrap();
        assert_eq!(report.materialized_rows, 60);
    }

    #[tokio::test]
    async fn test_background_validation_stops_waiting_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MaterializedLayout::new(dir.path(), "chdb");
        let oracle = StallingDataset {
            inner: dataset(),
            stall: std::time::Duration::from_millis(500),
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = validate_in_background(&cancel, oracle, table1(), layout)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_millis(400));
    }

    #[test]
    fn test_oracle_schema_must_match_table() {
        let dir = tempfile::tempdir().unwrap();
        let layout = MaterializedLayout::new(dir.path(), "chdb");
        let mut strings = RandomDataset::new(
            DatasetParams {
                rows_per_batch: 2,
                max_key_value: 10,
                max_iterations: 1,
                seed: 1,
            },
            KeyFormat::string_ids(),
        )
        .unwrap();
        let err = validate(&CancellationToken::new(), &mut strings, &table1(), &layout).unwrap_err();
        assert!(matches!(err, VerifyError::SchemaMismatch(_)));
    }
}
