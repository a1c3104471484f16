//! Insertion Driver
//!
//! Paces a dataset into the store under test: one batch per timer tick, encoded against the
//! table's source schema and handed to an [`InsertionApi`]. Submission is fire-and-forget;
//! a failed batch is logged and counted but never retried, since the dataset has already
//! advanced past it. The validator is what notices the missing rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::encode::{encode, WireRecord};
use crate::error::{Result, VerifyError};
use crate::tables::TableDef;

/// Entry point of the store under test.
///
/// `Ok` means the record was accepted for asynchronous processing, not that it is persisted.
#[async_trait]
pub trait InsertionApi: Send + Sync {
    async fn submit(&self, table: &str, source: &str, record: WireRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Time between submissions. The first submission happens one interval after start.
    #[serde(with = "crate::config::duration_ms")]
    pub interval: Duration,
    /// Stop after this many ticks even if the dataset still has batches.
    pub max_ticks: Option<usize>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_ticks: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverReport {
    pub ticks: usize,
    pub batches_submitted: usize,
    pub batches_failed: usize,
    pub rows_submitted: usize,
    pub rows_failed: usize,
    pub cancelled: bool,
}

/// Submit `dataset` batch by batch until it is done, `max_ticks` elapse, or `cancel` fires.
///
/// Generator and encoder errors abort the run; submission errors do not.
pub async fn run_insertion<D, A>(
    cancel: &CancellationToken,
    dataset: &mut D,
    api: &A,
    table: &TableDef,
    config: &DriverConfig,
) -> Result<DriverReport>
where
    D: Dataset + ?Sized,
    A: InsertionApi + ?Sized,
{
    if config.interval.is_zero() {
        return Err(VerifyError::Configuration(
            "driver interval must be non-zero".into(),
        ));
    }

    let mut report = DriverReport::default();
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        table = %table.name,
        source = %table.source_name,
        interval_ms = config.interval.as_millis() as u64,
        max_ticks = ?config.max_ticks,
        "starting insertion"
    );

    while !dataset.is_done() {
        if config.max_ticks.is_some_and(|max| report.ticks >= max) {
            debug!(table = %table.name, ticks = report.ticks, "tick limit reached");
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            _ = ticker.tick() => {}
        }
        report.ticks += 1;

        let batch = dataset.next_batch()?;
        let rows = batch.len();
        let record = encode(&batch, &table.source_schema)?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            res = api.submit(&table.name, &table.source_name, record) => res,
        };

        match outcome {
            Ok(()) => {
                report.batches_submitted += 1;
                report.rows_submitted += rows;
                debug!(table = %table.name, iteration = batch.iteration, rows, "inserted tuples");
            }
            Err(e) => {
                let err = VerifyError::Submission {
                    table: table.name.clone(),
                    reason: format!("{:#}", e),
                };
                warn!(iteration = batch.iteration, rows, error = %err, "failed to insert tuples");
                report.batches_failed += 1;
                report.rows_failed += rows;
            }
        }
    }

    info!(
        table = %table.name,
        ticks = report.ticks,
        submitted = report.batches_submitted,
        failed = report.batches_failed,
        cancelled = report.cancelled,
        "insertion finished"
    );

    Ok(report)
}
