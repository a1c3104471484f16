//! Local Warehouse
//!
//! In-process stand-in for the eventually-consistent store under test. Submissions are accepted
//! onto an unbounded queue and return immediately; a single worker task drains the queue,
//! projects each record to the table's stored columns and keeps the latest row per key (highest
//! order column, later arrival on ties). Changes are flushed in batches of up to the table's
//! `batch_processing_size` rows; each flush rewrites every touched partition under the
//! [`MaterializedLayout`] as parquet files of at most `max_object_size` rows.
//!
//! The queue depth reported through [`QueueDepthProbe`] counts records accepted but not yet
//! flushed, which is what the drain detector waits on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::columnar::{write_parquet, MaterializedLayout};
use crate::dataset::{KeyValue, Row, Schema};
use crate::drain::{QueueDepthProbe, DEFAULT_QUEUE_NAME};
use crate::driver::InsertionApi;
use crate::encode::{decode, encode_rows, WireRecord};
use crate::error::{Result, VerifyError};
use crate::tables::{TableDef, TableRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub queue_name: String,
    /// Pause before each queued record is processed.
    #[serde(with = "crate::config::duration_ms")]
    pub processing_delay: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            processing_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub records_processed: usize,
    pub records_failed: usize,
    pub rows_received: usize,
    pub flushes: usize,
    pub files_written: usize,
}

struct QueuedRecord {
    table: String,
    record: WireRecord,
}

pub struct LocalWarehouse {
    registry: TableRegistry,
    layout: MaterializedLayout,
    config: WarehouseConfig,
    tx: mpsc::UnboundedSender<QueuedRecord>,
    pending: Arc<AtomicUsize>,
}

impl LocalWarehouse {
    /// Start the warehouse and its worker. The worker exits when `cancel` fires or the
    /// warehouse is dropped.
    pub fn start(
        registry: TableRegistry,
        layout: MaterializedLayout,
        config: WarehouseConfig,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<WorkerStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker::new(registry.clone(), layout.clone());
        let handle = tokio::spawn(worker.run(
            rx,
            pending.clone(),
            config.processing_delay,
            cancel,
        ));

        info!(
            root = %layout.root.display(),
            queue = %config.queue_name,
            "local warehouse started"
        );

        let warehouse = Arc::new(Self {
            registry,
            layout,
            config,
            tx,
            pending,
        });
        (warehouse, handle)
    }

    pub fn layout(&self) -> &MaterializedLayout {
        &self.layout
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InsertionApi for LocalWarehouse {
    async fn submit(&self, table: &str, source: &str, record: WireRecord) -> anyhow::Result<()> {
        let def = self.registry.get_table(table)?;
        if def.source_name != source {
            anyhow::bail!(
                "table {} has no subscription '{}' (expected '{}')",
                table,
                source,
                def.source_name
            );
        }
        let schema = Schema::from_arrow(&record.schema())?;
        if schema != def.source_schema {
            anyhow::bail!("record schema does not match source schema of {}", table);
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedRecord {
            table: table.to_string(),
            record,
        };
        if self.tx.send(queued).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("warehouse worker has stopped");
        }
        Ok(())
    }
}

#[async_trait]
impl QueueDepthProbe for LocalWarehouse {
    async fn queue_depth(&self, queue: &str) -> anyhow::Result<usize> {
        if queue != self.config.queue_name {
            anyhow::bail!("unknown queue '{}'", queue);
        }
        Ok(self.pending())
    }
}

// =============================================================================
// WORKER
// =============================================================================

struct StoredRow {
    order: Option<i64>,
    arrival: u64,
    row: Row,
}

#[derive(Default)]
struct PartitionState {
    rows: BTreeMap<KeyValue, StoredRow>,
    current_files: Vec<PathBuf>,
}

struct Worker {
    registry: TableRegistry,
    layout: MaterializedLayout,
    partitions: HashMap<(String, u32), PartitionState>,
    /// Partitions changed since the last flush.
    dirty: BTreeSet<(String, u32)>,
    /// Rows applied per table since the last flush.
    unflushed_rows: HashMap<String, usize>,
    arrival_seq: u64,
    file_seq: u64,
    stats: WorkerStats,
}

impl Worker {
    fn new(registry: TableRegistry, layout: MaterializedLayout) -> Self {
        Self {
            registry,
            layout,
            partitions: HashMap::new(),
            dirty: BTreeSet::new(),
            unflushed_rows: HashMap::new(),
            arrival_seq: 0,
            file_seq: 0,
            stats: WorkerStats::default(),
        }
    }

    /// Records stay counted as pending until the flush that persists them. A flush happens once
    /// a table has `batch_processing_size` unflushed rows, or when nothing else is queued.
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<QueuedRecord>,
        pending: Arc<AtomicUsize>,
        delay: Duration,
        cancel: CancellationToken,
    ) -> WorkerStats {
        let mut held = 0usize;
        loop {
            let queued = tokio::select! {
                _ = cancel.cancelled() => break,
                queued = rx.recv() => match queued {
                    Some(q) => q,
                    None => break,
                },
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.apply(&queued) {
                Ok(()) => self.stats.records_processed += 1,
                Err(e) => {
                    error!(table = %queued.table, error = %e, "failed processing tuples");
                    self.stats.records_failed += 1;
                }
            }
            held += 1;

            let queue_empty = pending.load(Ordering::SeqCst) == held;
            if queue_empty || self.batch_full(&queued.table) {
                self.flush_dirty();
                pending.fetch_sub(held, Ordering::SeqCst);
                held = 0;
            }
        }

        info!(
            processed = self.stats.records_processed,
            failed = self.stats.records_failed,
            flushes = self.stats.flushes,
            files = self.stats.files_written,
            "local warehouse worker stopped"
        );
        self.stats
    }

    fn batch_full(&self, table: &str) -> bool {
        let Ok(def) = self.registry.get_table(table) else {
            return false;
        };
        self.unflushed_rows.get(table).copied().unwrap_or(0) >= def.options.batch_processing_size
    }

    fn apply(&mut self, queued: &QueuedRecord) -> Result<()> {
        let table = self.registry.get_table(&queued.table)?.clone();
        let rows = decode(&queued.record, &table.source_schema)?;
        self.stats.rows_received += rows.len();

        let schema = &table.source_schema;
        let key_idx = schema
            .index_of(&table.key_column)
            .ok_or_else(|| VerifyError::SchemaMismatch("key column missing".into()))?;
        let order_idx = match &table.order_column {
            Some(col) => Some(schema.index_of(col).ok_or_else(|| {
                VerifyError::SchemaMismatch(format!("order column '{}' missing", col))
            })?),
            None => None,
        };
        let stored_idx: Vec<usize> = table
            .stored_columns
            .iter()
            .filter_map(|c| schema.index_of(c))
            .collect();

        for row in rows {
            let key = row.0[key_idx].as_key().ok_or_else(|| {
                VerifyError::SchemaMismatch(format!(
                    "key column '{}' is not int32 or utf8",
                    table.key_column
                ))
            })?;
            let order = order_idx.and_then(|i| row.0[i].as_order());
            let partition = table.partitioning.partition_of(&key)?;

            self.arrival_seq += 1;
            let candidate = StoredRow {
                order,
                arrival: self.arrival_seq,
                row: Row(stored_idx.iter().map(|&i| row.0[i].clone()).collect()),
            };

            let state = self
                .partitions
                .entry((table.name.clone(), partition))
                .or_default();
            let wins = state.rows.get(&key).map_or(true, |cur| {
                (candidate.order, candidate.arrival) >= (cur.order, cur.arrival)
            });
            if wins {
                state.rows.insert(key, candidate);
            }
            self.dirty.insert((table.name.clone(), partition));
            *self.unflushed_rows.entry(table.name.clone()).or_default() += 1;
        }
        Ok(())
    }

    fn flush_dirty(&mut self) {
        let dirty = std::mem::take(&mut self.dirty);
        self.unflushed_rows.clear();
        if dirty.is_empty() {
            return;
        }

        for (table_name, partition) in dirty {
            let table = match self.registry.get_table(&table_name) {
                Ok(t) => t.clone(),
                Err(e) => {
                    error!(table = %table_name, error = %e, "failed flushing partition");
                    continue;
                }
            };
            if let Err(e) = self.flush_partition(&table, partition) {
                error!(table = %table_name, partition, error = %e, "failed flushing partition");
            }
        }
        self.stats.flushes += 1;
    }

    /// Rewrite the partition's current state as files of at most `max_object_size` rows and
    /// drop the files they supersede.
    fn flush_partition(&mut self, table: &TableDef, partition: u32) -> Result<()> {
        let stored_schema = table.stored_schema()?;
        let max_rows = table.options.max_object_size.max(1);
        let dir = self.layout.partition_dir(&table.name, partition);
        self.file_seq += 1;
        let seq = self.file_seq;

        let Some(state) = self.partitions.get_mut(&(table.name.clone(), partition)) else {
            return Ok(());
        };
        let rows: Vec<Row> = state.rows.values().map(|s| s.row.clone()).collect();

        let mut written = Vec::new();
        for (chunk_idx, chunk) in rows.chunks(max_rows).enumerate() {
            let path = dir.join(format!("d_{}_{}.parquet", seq, chunk_idx));
            write_parquet(&path, &encode_rows(chunk, &stored_schema)?)?;
            written.push(path);
        }

        let files = written.len();
        for previous in std::mem::replace(&mut state.current_files, written) {
            if let Err(e) = std::fs::remove_file(&previous) {
                warn!(path = %previous.display(), error = %e, "failed removing superseded file");
            }
        }
        self.stats.files_written += files;
        debug!(table = %table.name, partition, rows = rows.len(), files, "flushed partition");
        Ok(())
    }
}
