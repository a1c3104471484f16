//! Comparison Engine
//!
//! In-memory SQLite database holding two tables:
//! - `snapshot`: every oracle row, all source columns plus `_seq` (load order)
//! - `materialized`: every physical row read back from the store, stored columns plus `_seq`
//!
//! The expected final state is a window query over `snapshot` (top row per key by the order
//! column, load order breaking ties), computed here and never by the store under test.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use tracing::debug;

use crate::columnar::read_parquet;
use crate::dataset::{FieldType, Row, Schema, Value};
use crate::encode::decode;
use crate::error::{Result, VerifyError};
use crate::tables::TableDef;

const SNAPSHOT_TABLE: &str = "snapshot";
const MATERIALIZED_TABLE: &str = "materialized";
const SEQ_COLUMN: &str = "_seq";

/// Outcome of the latest-value check, split by direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchCounts {
    /// Materialized rows with no expected row for their key, or differing in a compared column.
    pub unexpected: usize,
    /// Expected rows whose key never reached materialized output.
    pub missing: usize,
}

impl MatchCounts {
    pub fn total(&self) -> usize {
        self.unexpected + self.missing
    }
}

pub struct ComparisonEngine {
    conn: Connection,
    key_column: String,
    order_column: Option<String>,
    source_schema: Schema,
    stored_schema: Schema,
    snapshot_seq: i64,
    materialized_seq: i64,
}

impl ComparisonEngine {
    pub fn new(table: &TableDef) -> Result<Self> {
        let stored_schema = table.stored_schema()?;
        let conn = Connection::open_in_memory()?;

        conn.execute_batch(&create_table_sql(SNAPSHOT_TABLE, &table.source_schema))?;
        conn.execute_batch(&create_table_sql(MATERIALIZED_TABLE, &stored_schema))?;
        conn.execute_batch(&format!(
            "CREATE INDEX snapshot_key ON {snap}({key});
             CREATE INDEX materialized_key ON {mat}({key});",
            snap = SNAPSHOT_TABLE,
            mat = MATERIALIZED_TABLE,
            key = quote(&table.key_column),
        ))?;

        Ok(Self {
            conn,
            key_column: table.key_column.clone(),
            order_column: table.order_column.clone(),
            source_schema: table.source_schema.clone(),
            stored_schema,
            snapshot_seq: 0,
            materialized_seq: 0,
        })
    }

    // ===== LOADING =====

    pub fn load_snapshot_files(&mut self, files: &[impl AsRef<Path>]) -> Result<usize> {
        let schema = self.source_schema.clone();
        let rows = read_rows(files, &schema)?;
        self.load_snapshot_rows(&rows)
    }

    pub fn load_materialized_files(&mut self, files: &[impl AsRef<Path>]) -> Result<usize> {
        let schema = self.stored_schema.clone();
        let rows = read_rows(files, &schema)?;
        self.load_materialized_rows(&rows)
    }

    /// Rows must follow the table's source schema, in production order.
    pub fn load_snapshot_rows(&mut self, rows: &[Row]) -> Result<usize> {
        let mut seq = self.snapshot_seq;
        insert_rows(&mut self.conn, SNAPSHOT_TABLE, &self.source_schema, rows, &mut seq)?;
        self.snapshot_seq = seq;
        Ok(rows.len())
    }

    /// Rows must follow the table's stored schema.
    pub fn load_materialized_rows(&mut self, rows: &[Row]) -> Result<usize> {
        let mut seq = self.materialized_seq;
        insert_rows(
            &mut self.conn,
            MATERIALIZED_TABLE,
            &self.stored_schema,
            rows,
            &mut seq,
        )?;
        self.materialized_seq = seq;
        Ok(rows.len())
    }

    // ===== CHECKS =====

    /// Number of keys with more than one materialized row.
    pub fn duplicate_keys(&self) -> Result<usize> {
        let key = quote(&self.key_column);
        let sql = format!(
            "SELECT COUNT(*) FROM (
                SELECT {key} FROM {mat} GROUP BY {key} HAVING COUNT(*) > 1
             )",
            key = key,
            mat = MATERIALIZED_TABLE,
        );
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn check_uniqueness(&self) -> Result<()> {
        match self.duplicate_keys()? {
            0 => Ok(()),
            count => Err(VerifyError::DuplicateKey { count }),
        }
    }

    /// Distinct keys in the snapshot, which is the size of the expected final state.
    pub fn expected_rows(&self) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(DISTINCT {key}) FROM {snap}",
            key = quote(&self.key_column),
            snap = SNAPSHOT_TABLE,
        );
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn match_counts(&self) -> Result<MatchCounts> {
        let key = quote(&self.key_column);
        let expected = self.expected_sql();

        let differs: Vec<String> = self
            .stored_schema
            .fields()
            .iter()
            .filter(|f| f.name != self.key_column)
            .map(|f| format!("m.{c} IS NOT e.{c}", c = quote(&f.name)))
            .collect();
        let mut unexpected_cond = format!("e.{} IS NULL", key);
        for cond in &differs {
            unexpected_cond.push_str(" OR ");
            unexpected_cond.push_str(cond);
        }

        let unexpected_sql = format!(
            "WITH expected AS ({expected})
             SELECT COUNT(*) FROM {mat} m
             LEFT JOIN expected e ON m.{key} = e.{key}
             WHERE {cond}",
            expected = expected,
            mat = MATERIALIZED_TABLE,
            key = key,
            cond = unexpected_cond,
        );
        let missing_sql = format!(
            "WITH expected AS ({expected})
             SELECT COUNT(*) FROM expected e
             WHERE NOT EXISTS (SELECT 1 FROM {mat} m WHERE m.{key} = e.{key})",
            expected = expected,
            mat = MATERIALIZED_TABLE,
            key = key,
        );

        let unexpected: i64 = self.conn.query_row(&unexpected_sql, [], |row| row.get(0))?;
        let missing: i64 = self.conn.query_row(&missing_sql, [], |row| row.get(0))?;
        let counts = MatchCounts {
            unexpected: unexpected as usize,
            missing: missing as usize,
        };
        debug!(unexpected = counts.unexpected, missing = counts.missing, "latest-value check");
        Ok(counts)
    }

    pub fn check_latest_values(&self) -> Result<()> {
        let counts = self.match_counts()?;
        if counts.total() == 0 {
            return Ok(());
        }
        Err(VerifyError::Mismatch {
            count: counts.total(),
            unexpected: counts.unexpected,
            missing: counts.missing,
        })
    }

    /// Top-ranked snapshot row per key.
    fn expected_sql(&self) -> String {
        let ranking = match &self.order_column {
            Some(order) => format!("{} DESC, {} DESC", quote(order), SEQ_COLUMN),
            None => format!("{} DESC", SEQ_COLUMN),
        };
        let columns: Vec<String> = self
            .stored_schema
            .fields()
            .iter()
            .map(|f| quote(&f.name))
            .collect();
        format!(
            "SELECT {cols} FROM (
                SELECT {cols}, ROW_NUMBER() OVER (PARTITION BY {key} ORDER BY {ranking}) AS rn
                FROM {snap}
             ) WHERE rn = 1",
            cols = columns.join(", "),
            key = quote(&self.key_column),
            ranking = ranking,
            snap = SNAPSHOT_TABLE,
        )
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Int32 | FieldType::Boolean => "INTEGER",
        FieldType::Float64 => "REAL",
        FieldType::Utf8 => "TEXT",
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Int32(v) => SqlValue::Integer(*v as i64),
        Value::Boolean(v) => SqlValue::Integer(*v as i64),
        Value::Float64(v) => SqlValue::Real(*v),
        Value::Utf8(v) => SqlValue::Text(v.clone()),
    }
}

fn create_table_sql(name: &str, schema: &Schema) -> String {
    let mut columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| format!("{} {} NOT NULL", quote(&f.name), sql_type(f.field_type)))
        .collect();
    columns.push(format!("{} INTEGER NOT NULL", SEQ_COLUMN));
    format!("CREATE TABLE {} ({});", name, columns.join(", "))
}

fn insert_rows(
    conn: &mut Connection,
    table: &str,
    schema: &Schema,
    rows: &[Row],
    seq: &mut i64,
) -> Result<()> {
    let placeholders: Vec<String> = (1..=schema.len() + 1).map(|i| format!("?{}", i)).collect();
    let sql = format!("INSERT INTO {} VALUES ({})", table, placeholders.join(", "));

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&sql)?;
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(VerifyError::SchemaMismatch(format!(
                    "{} row {} has {} fields, expected {}",
                    table,
                    idx,
                    row.len(),
                    schema.len()
                )));
            }
            *seq += 1;
            let values = row
                .values()
                .iter()
                .map(to_sql)
                .chain(std::iter::once(SqlValue::Integer(*seq)));
            stmt.execute(params_from_iter(values))?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn read_rows(files: &[impl AsRef<Path>], schema: &Schema) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for file in files {
        for record in read_parquet(file.as_ref())? {
            rows.extend(decode(&record, schema)?);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::table1;

    fn source(key: i32, order: i32, measure: f64) -> Row {
        Row(vec![
            Value::Int32(key),
            Value::Boolean(order % 2 == 0),
            Value::Float64(measure),
            Value::Utf8(format!("event{}", order)),
            Value::Int32(order),
        ])
    }

    fn stored(key: i32, order: i32, measure: f64) -> Row {
        Row(vec![
            Value::Int32(key),
            Value::Boolean(order % 2 == 0),
            Value::Float64(measure),
        ])
    }

    fn engine_with_snapshot(rows: &[Row]) -> ComparisonEngine {
        let mut engine = ComparisonEngine::new(&table1()).unwrap();
        engine.load_snapshot_rows(rows).unwrap();
        engine
    }

    #[test]
    fn test_exact_match_passes() {
        let mut engine = engine_with_snapshot(&[source(1, 0, 0.0), source(2, 1, 1.0)]);
        engine
            .load_materialized_rows(&[stored(2, 1, 1.0), stored(1, 0, 0.0)])
            .unwrap();

        engine.check_uniqueness().unwrap();
        engine.check_latest_values().unwrap();
        assert_eq!(engine.expected_rows().unwrap(), 2);
    }

    #[test]
    fn test_highest_order_is_expected() {
        // Key 7 written twice; the later production carries a lower order value.
        let mut engine = engine_with_snapshot(&[source(7, 10, 10.0), source(7, 4, 4.0)]);
        engine.load_materialized_rows(&[stored(7, 10, 10.0)]).unwrap();
        assert_eq!(engine.match_counts().unwrap(), MatchCounts::default());

        let mut stale = engine_with_snapshot(&[source(7, 10, 10.0), source(7, 4, 4.0)]);
        stale.load_materialized_rows(&[stored(7, 4, 4.0)]).unwrap();
        let counts = stale.match_counts().unwrap();
        assert_eq!(counts.unexpected, 1);
        assert_eq!(counts.missing, 0);
    }

    #[test]
    fn test_load_order_breaks_ties_without_order_column() {
        let mut table = table1();
        table.order_column = None;
        let mut engine = ComparisonEngine::new(&table).unwrap();
        engine
            .load_snapshot_rows(&[source(3, 1, 1.0), source(3, 2, 2.0)])
            .unwrap();
        engine.load_materialized_rows(&[stored(3, 2, 2.0)]).unwrap();
        engine.check_latest_values().unwrap();
    }

    #[test]
    fn test_missing_rows_are_counted() {
        let snapshot: Vec<Row> = (0..5).map(|k| source(k, k, k as f64)).collect();
        let mut engine = engine_with_snapshot(&snapshot);
        engine
            .load_materialized_rows(&[stored(0, 0, 0.0), stored(1, 1, 1.0)])
            .unwrap();

        let err = engine.check_latest_values().unwrap_err();
        match err {
            VerifyError::Mismatch {
                count,
                unexpected,
                missing,
            } => {
                assert_eq!(count, 3);
                assert_eq!(unexpected, 0);
                assert_eq!(missing, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_changed_value_and_unknown_key_are_unexpected() {
        let mut engine = engine_with_snapshot(&[source(1, 1, 1.0), source(2, 2, 2.0)]);
        engine
            .load_materialized_rows(&[stored(1, 1, 1.5), stored(2, 2, 2.0), stored(99, 3, 3.0)])
            .unwrap();
        let counts = engine.match_counts().unwrap();
        assert_eq!(counts.unexpected, 2);
        assert_eq!(counts.missing, 0);
    }

    #[test]
    fn test_duplicate_key_is_reported_once() {
        let mut engine = engine_with_snapshot(&[source(1, 1, 1.0), source(2, 2, 2.0)]);
        engine
            .load_materialized_rows(&[
                stored(1, 1, 1.0),
                stored(1, 1, 1.0),
                stored(1, 1, 1.0),
                stored(2, 2, 2.0),
            ])
            .unwrap();
        assert!(matches!(
            engine.check_uniqueness(),
            Err(VerifyError::DuplicateKey { count: 1 })
        ));
    }

    #[test]
    fn test_row_arity_is_checked() {
        let mut engine = ComparisonEngine::new(&table1()).unwrap();
        let err = engine
            .load_materialized_rows(&[Row(vec![Value::Int32(1)])])
            .unwrap_err();
        assert!(matches!(err, VerifyError::SchemaMismatch(_)));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote("sampleId"), "\"sampleId\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
