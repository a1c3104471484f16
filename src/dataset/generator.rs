//! Seeded Random Dataset Generator
//!
//! Produces `rows_per_batch` rows per iteration for `max_iterations` iterations. The key column
//! is drawn from `[0, max_key_value)` by rejection sampling against the set of keys already
//! emitted, so no key is ever produced twice over the generator's lifetime. Every other column
//! is a pure function of the global row cursor `c`:
//!
//! | column      | value              |
//! |-------------|--------------------|
//! | `column1`   | unique key         |
//! | `column2`   | `c % 2 == 0`       |
//! | `column3`   | `c as f64`         |
//! | `eventName` | `"event{c}"`       |
//! | `sampleId`  | `c` (order field)  |

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use super::{Batch, Dataset, Field, FieldType, Row, Schema, Value};
use crate::error::{Result, VerifyError};

pub const KEY_COLUMN: &str = "column1";
pub const FLAG_COLUMN: &str = "column2";
pub const MEASURE_COLUMN: &str = "column3";
pub const EVENT_COLUMN: &str = "eventName";
pub const ORDER_COLUMN: &str = "sampleId";

/// Seed shared by the preset datasets.
pub const DEFAULT_SEED: u64 = 64;

/// How the drawn key number is rendered into the key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFormat {
    /// Key column is `Int32` holding the drawn number.
    Int32,
    /// Key column is `Utf8` holding `"{prefix}{n}"`.
    Prefixed(String),
}

impl KeyFormat {
    pub fn string_ids() -> Self {
        Self::Prefixed("string-id-".to_string())
    }

    fn field_type(&self) -> FieldType {
        match self {
            Self::Int32 => FieldType::Int32,
            Self::Prefixed(_) => FieldType::Utf8,
        }
    }

    fn render(&self, key: u32) -> Value {
        match self {
            // max_key_value <= i32::MAX is checked at construction
            Self::Int32 => Value::Int32(key as i32),
            Self::Prefixed(prefix) => Value::Utf8(format!("{}{}", prefix, key)),
        }
    }
}

/// Sizing and seed of a [`RandomDataset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetParams {
    pub rows_per_batch: usize,
    pub max_key_value: u32,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for DatasetParams {
    fn default() -> Self {
        Self {
            rows_per_batch: 1000,
            max_key_value: 100_000,
            max_iterations: 10,
            seed: DEFAULT_SEED,
        }
    }
}

impl DatasetParams {
    pub fn total_rows(&self) -> usize {
        self.rows_per_batch.saturating_mul(self.max_iterations)
    }
}

/// Set of key numbers already handed out by one generator run.
#[derive(Debug, Clone, Default)]
pub struct KeySpace {
    seen: HashSet<u32>,
}

impl KeySpace {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn contains(&self, key: u32) -> bool {
        self.seen.contains(&key)
    }

    /// Records `key`; returns false if it was already present.
    fn claim(&mut self, key: u32) -> bool {
        self.seen.insert(key)
    }

    fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Deterministic, collision-free synthetic dataset.
pub struct RandomDataset {
    params: DatasetParams,
    key_format: KeyFormat,
    schema: Schema,

    idx: usize,
    iterations_completed: usize,

    rng: ChaCha8Rng,
    key_space: KeySpace,
}

impl RandomDataset {
    pub fn new(params: DatasetParams, key_format: KeyFormat) -> Result<Self> {
        if params.rows_per_batch == 0 {
            return Err(VerifyError::Configuration(
                "rows_per_batch must be positive".into(),
            ));
        }
        if params.max_key_value == 0 || params.max_key_value > i32::MAX as u32 {
            return Err(VerifyError::Configuration(format!(
                "max_key_value must be in 1..={}, got {}",
                i32::MAX,
                params.max_key_value
            )));
        }
        if params.total_rows() > i32::MAX as usize {
            return Err(VerifyError::Configuration(format!(
                "{} rows would overflow the int32 order column",
                params.total_rows()
            )));
        }

        let schema = Schema::new(vec![
            Field::new(KEY_COLUMN, key_format.field_type()),
            Field::new(FLAG_COLUMN, FieldType::Boolean),
            Field::new(MEASURE_COLUMN, FieldType::Float64),
            Field::new(EVENT_COLUMN, FieldType::Utf8),
            Field::new(ORDER_COLUMN, FieldType::Int32),
        ]);

        // Cap the pre-allocation; the key space never exceeds max_key_value entries.
        let capacity = params.total_rows().min(params.max_key_value as usize);

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(params.seed),
            key_space: KeySpace::with_capacity(capacity),
            params,
            key_format,
            schema,
            idx: 0,
            iterations_completed: 0,
        })
    }

    /// 1000 rows × 10 iterations over a 100k key space.
    pub fn medium(key_format: KeyFormat) -> Self {
        Self::new(DatasetParams::default(), key_format)
            .expect("default dataset params are valid")
    }

    pub fn params(&self) -> &DatasetParams {
        &self.params
    }

    pub fn key_format(&self) -> &KeyFormat {
        &self.key_format
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.key_space
    }

    pub fn iterations_completed(&self) -> usize {
        self.iterations_completed
    }

    fn draw_key(&mut self) -> u32 {
        loop {
            let candidate = self.rng.gen_range(0..self.params.max_key_value);
            if self.key_space.claim(candidate) {
                return candidate;
            }
        }
    }
}

impl Dataset for RandomDataset {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn is_done(&self) -> bool {
        self.iterations_completed >= self.params.max_iterations
    }

    fn reset(&mut self) {
        self.idx = 0;
        self.iterations_completed = 0;
        self.key_space.clear();
        self.rng = ChaCha8Rng::seed_from_u64(self.params.seed);
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if self.is_done() {
            return Err(VerifyError::Exhausted {
                iterations: self.iterations_completed,
            });
        }

        // Rejection sampling cannot terminate once every key is taken; refuse up front so a
        // failed call leaves the generator untouched.
        let used = self.key_space.len();
        if used + self.params.rows_per_batch > self.params.max_key_value as usize {
            return Err(VerifyError::ExhaustedKeySpace {
                used,
                requested: self.params.rows_per_batch,
                max_key_value: self.params.max_key_value,
            });
        }

        let start = self.idx;
        let end = start + self.params.rows_per_batch;
        let mut rows = Vec::with_capacity(self.params.rows_per_batch);
        for c in start..end {
            let key = self.draw_key();
            rows.push(Row(vec![
                self.key_format.render(key),
                Value::Boolean(c % 2 == 0),
                Value::Float64(c as f64),
                Value::Utf8(format!("event{}", c)),
                Value::Int32(c as i32),
            ]));
        }

        let batch = Batch {
            iteration: self.iterations_completed,
            rows,
        };

        self.idx = end;
        self.iterations_completed += 1;

        debug!(
            iteration = batch.iteration,
            cursor = self.idx,
            keys_used = self.key_space.len(),
            "built dataset batch"
        );

        Ok(batch)
    }

    fn rows_emitted(&self) -> usize {
        self.idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(rows: usize, max_key: u32, iters: usize) -> RandomDataset {
        RandomDataset::new(
            DatasetParams {
                rows_per_batch: rows,
                max_key_value: max_key,
                max_iterations: iters,
                seed: DEFAULT_SEED,
            },
            KeyFormat::Int32,
        )
        .unwrap()
    }

    fn drain(ds: &mut dyn Dataset) -> Vec<Batch> {
        let mut out = Vec::new();
        while !ds.is_done() {
            out.push(ds.next_batch().unwrap());
        }
        out
    }

    #[test]
    fn test_independent_instances_are_identical() {
        let mut a = small(50, 1_000, 5);
        let mut b = small(50, 1_000, 5);
        assert_eq!(drain(&mut a), drain(&mut b));
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = small(50, 1_000, 2);
        let mut b = RandomDataset::new(
            DatasetParams {
                rows_per_batch: 50,
                max_key_value: 1_000,
                max_iterations: 2,
                seed: DEFAULT_SEED + 1,
            },
            KeyFormat::Int32,
        )
        .unwrap();
        assert_ne!(drain(&mut a), drain(&mut b));
    }

    #[test]
    fn test_reset_replays_same_sequence() {
        let mut ds = small(20, 500, 4);
        let first = drain(&mut ds);
        assert!(ds.is_done());

        ds.reset();
        assert!(!ds.is_done());
        assert_eq!(ds.rows_emitted(), 0);
        assert!(ds.key_space().is_empty());

        let second = drain(&mut ds);
        assert_eq!(first, second);
    }

    #[test]
    fn test_keys_never_repeat_across_batches() {
        let mut ds = small(100, 1_000, 9);
        let mut keys = HashSet::new();
        let mut count = 0;
        for batch in drain(&mut ds) {
            for row in batch.rows {
                keys.insert(row.0[0].as_key().unwrap());
                count += 1;
            }
        }
        assert_eq!(count, 900);
        assert_eq!(keys.len(), count);
    }

    #[test]
    fn test_full_key_space_is_usable() {
        // Every key in the space gets used exactly once.
        let mut ds = small(10, 30, 3);
        let batches = drain(&mut ds);
        let mut keys: Vec<i32> = batches
            .iter()
            .flat_map(|b| b.rows.iter())
            .map(|r| match r.0[0] {
                Value::Int32(v) => v,
                _ => unreachable!(),
            })
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_row_columns_follow_cursor() {
        let mut ds = small(4, 100, 2);
        ds.next_batch().unwrap();
        let batch = ds.next_batch().unwrap();
        assert_eq!(batch.iteration, 1);

        let row = &batch.rows[1];
        assert_eq!(row.0[1], Value::Boolean(false));
        assert_eq!(row.0[2], Value::Float64(5.0));
        assert_eq!(row.0[3], Value::Utf8("event5".into()));
        assert_eq!(row.0[4], Value::Int32(5));
    }

    #[test]
    fn test_next_batch_after_done_fails() {
        let mut ds = small(5, 100, 1);
        ds.next_batch().unwrap();
        assert!(ds.is_done());
        let err = ds.next_batch().unwrap_err();
        assert!(matches!(err, VerifyError::Exhausted { iterations: 1 }));
    }

    #[test]
    fn test_small_key_space_fails_instead_of_hanging() {
        let mut ds = small(10, 25, 3);
        ds.next_batch().unwrap();
        ds.next_batch().unwrap();
        let err = ds.next_batch().unwrap_err();
        assert!(matches!(
            err,
            VerifyError::ExhaustedKeySpace {
                used: 20,
                requested: 10,
                max_key_value: 25
            }
        ));
        // Failed call did not advance the generator.
        assert_eq!(ds.iterations_completed(), 2);
        assert_eq!(ds.rows_emitted(), 20);
    }

    #[test]
    fn test_prefixed_keys() {
        let mut ds = RandomDataset::new(
            DatasetParams {
                rows_per_batch: 3,
                max_key_value: 10,
                max_iterations: 1,
                seed: 7,
            },
            KeyFormat::string_ids(),
        )
        .unwrap();
        assert_eq!(ds.schema().fields()[0].field_type, FieldType::Utf8);
        let batch = ds.next_batch().unwrap();
        for row in &batch.rows {
            match &row.0[0] {
                Value::Utf8(s) => assert!(s.starts_with("string-id-")),
                other => panic!("unexpected key {:?}", other),
            }
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let zero_rows = RandomDataset::new(
            DatasetParams {
                rows_per_batch: 0,
                ..DatasetParams::default()
            },
            KeyFormat::Int32,
        );
        assert!(matches!(zero_rows, Err(VerifyError::Configuration(_))));

        let huge_keys = RandomDataset::new(
            DatasetParams {
                max_key_value: u32::MAX,
                ..DatasetParams::default()
            },
            KeyFormat::Int32,
        );
        assert!(matches!(huge_keys, Err(VerifyError::Configuration(_))));
    }
}
