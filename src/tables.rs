//! Table Declarations
//!
//! Describes each table under test: the schema its external source submits, the columns the
//! store keeps, the key and order columns that define "latest wins", and how keys are routed to
//! partitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::dataset::{
    Field, FieldType, KeyFormat, KeyValue, Schema, EVENT_COLUMN, FLAG_COLUMN, KEY_COLUMN,
    MEASURE_COLUMN, ORDER_COLUMN,
};
use crate::error::{Result, VerifyError};

/// Maps a key to a partition id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Partitioning {
    /// `(key div width) mod count`, for integer keys.
    IntegerRange { width: i64, count: u32 },
    /// `fnv1a32(key) mod count`, for string keys.
    StringHash { count: u32 },
}

impl Partitioning {
    pub fn partition_of(&self, key: &KeyValue) -> Result<u32> {
        match (self, key) {
            (Self::IntegerRange { width, count }, KeyValue::Int(v)) => {
                let bucket = (*v as i64).div_euclid(*width);
                Ok(bucket.rem_euclid(*count as i64) as u32)
            }
            (Self::StringHash { count }, KeyValue::Str(s)) => Ok(fnv1a32(s.as_bytes()) % count),
            (Self::StringHash { count }, KeyValue::Int(v)) => {
                Ok(fnv1a32(v.to_string().as_bytes()) % count)
            }
            (Self::IntegerRange { .. }, KeyValue::Str(s)) => Err(VerifyError::SchemaMismatch(
                format!("integer range partitioning cannot route string key '{}'", s),
            )),
        }
    }

    pub fn partition_count(&self) -> u32 {
        match self {
            Self::IntegerRange { count, .. } | Self::StringHash { count } => *count,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::IntegerRange { width, count } if *width <= 0 || *count == 0 => {
                Err(VerifyError::Configuration(format!(
                    "integer range partitioning needs positive width and count, got {}x{}",
                    width, count
                )))
            }
            Self::StringHash { count: 0 } => Err(VerifyError::Configuration(
                "string hash partitioning needs at least one partition".into(),
            )),
            _ => Ok(()),
        }
    }
}

fn fnv1a32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Processing knobs the store applies per table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    /// Unflushed rows that force a flush even while more work is queued.
    pub batch_processing_size: usize,
    /// Maximum rows per materialized file.
    pub max_object_size: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            batch_processing_size: 5000,
            max_object_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Subscription the external source submits through.
    pub source_name: String,
    /// Schema of records submitted by the source.
    pub source_schema: Schema,
    /// Columns persisted by the store, key first.
    pub stored_columns: Vec<String>,
    pub key_column: String,
    /// Highest value wins when a key is written more than once.
    pub order_column: Option<String>,
    pub partitioning: Partitioning,
    pub options: TableOptions,
}

impl TableDef {
    /// Checks that the key, order and stored columns exist in the source schema with usable
    /// types.
    pub fn validate(&self) -> Result<()> {
        let key = self.source_schema.field(&self.key_column).ok_or_else(|| {
            VerifyError::Configuration(format!(
                "table {}: key column '{}' not in source schema",
                self.name, self.key_column
            ))
        })?;
        if !matches!(key.field_type, FieldType::Int32 | FieldType::Utf8) {
            return Err(VerifyError::Configuration(format!(
                "table {}: key column '{}' must be int32 or utf8",
                self.name, self.key_column
            )));
        }

        if let Some(order) = &self.order_column {
            match self.source_schema.field(order) {
                Some(f) if f.field_type == FieldType::Int32 => {}
                _ => {
                    return Err(VerifyError::Configuration(format!(
                        "table {}: order column '{}' must be an int32 source column",
                        self.name, order
                    )))
                }
            }
        }

        if self.stored_columns.first() != Some(&self.key_column) {
            return Err(VerifyError::Configuration(format!(
                "table {}: stored columns must start with the key column",
                self.name
            )));
        }
        if self.options.batch_processing_size == 0 || self.options.max_object_size == 0 {
            return Err(VerifyError::Configuration(format!(
                "table {}: batch processing size and max object size must be positive",
                self.name
            )));
        }
        self.stored_schema()?;
        self.partitioning.validate()
    }

    pub fn stored_schema(&self) -> Result<Schema> {
        self.source_schema.project(&self.stored_columns)
    }

    /// Generator key format producing this table's key column.
    pub fn key_format(&self) -> Result<KeyFormat> {
        match self.source_schema.field(&self.key_column).map(|f| f.field_type) {
            Some(FieldType::Int32) => Ok(KeyFormat::Int32),
            Some(FieldType::Utf8) => Ok(KeyFormat::string_ids()),
            _ => Err(VerifyError::Configuration(format!(
                "table {}: no generator for key column '{}'",
                self.name, self.key_column
            ))),
        }
    }

    pub fn with_options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }
}

/// Source schema shared by the synthetic tables.
fn synthetic_source_schema(key_type: FieldType) -> Schema {
    Schema::new(vec![
        Field::new(KEY_COLUMN, key_type),
        Field::new(FLAG_COLUMN, FieldType::Boolean),
        Field::new(MEASURE_COLUMN, FieldType::Float64),
        Field::new(EVENT_COLUMN, FieldType::Utf8),
        Field::new(ORDER_COLUMN, FieldType::Int32),
    ])
}

fn synthetic_table(
    name: &str,
    subscription: &str,
    key_type: FieldType,
    partitioning: Partitioning,
) -> TableDef {
    TableDef {
        name: name.to_string(),
        source_name: format!("external.{}", subscription),
        source_schema: synthetic_source_schema(key_type),
        stored_columns: vec![
            KEY_COLUMN.to_string(),
            FLAG_COLUMN.to_string(),
            MEASURE_COLUMN.to_string(),
        ],
        key_column: KEY_COLUMN.to_string(),
        order_column: Some(ORDER_COLUMN.to_string()),
        partitioning,
        options: TableOptions::default(),
    }
}

/// Integer-keyed table, 10 range partitions of width 1000.
pub fn table1() -> TableDef {
    synthetic_table(
        "table1",
        "sourceSystemTable1",
        FieldType::Int32,
        Partitioning::IntegerRange {
            width: 1000,
            count: 10,
        },
    )
}

/// String-keyed table, 10 FNV hash partitions.
pub fn table2() -> TableDef {
    synthetic_table(
        "table2",
        "sourceSystemTable2",
        FieldType::Utf8,
        Partitioning::StringHash { count: 10 },
    )
}

#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, TableDef>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `table1` and `table2`.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        registry.add_tables([table1(), table2()])?;
        Ok(registry)
    }

    pub fn add_tables(&mut self, tables: impl IntoIterator<Item = TableDef>) -> Result<()> {
        for table in tables {
            table.validate()?;
            if self.tables.contains_key(&table.name) {
                return Err(VerifyError::Configuration(format!(
                    "table {} registered twice",
                    table.name
                )));
            }
            info!(
                table = %table.name,
                source = %table.source_name,
                partitions = table.partitioning.partition_count(),
                "registered table"
            );
            self.tables.insert(table.name.clone(), table);
        }
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| VerifyError::UnknownTable(name.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn test_integer_range_partitions() {
        let p = Partitioning::IntegerRange {
            width: 1000,
            count: 10,
        };
        assert_eq!(p.partition_of(&KeyValue::Int(0)).unwrap(), 0);
        assert_eq!(p.partition_of(&KeyValue::Int(999)).unwrap(), 0);
        assert_eq!(p.partition_of(&KeyValue::Int(1000)).unwrap(), 1);
        assert_eq!(p.partition_of(&KeyValue::Int(12_345)).unwrap(), 2);
        assert_eq!(p.partition_of(&KeyValue::Int(-1)).unwrap(), 9);
        assert!(p.partition_of(&KeyValue::Str("x".into())).is_err());
    }

    #[test]
    fn test_string_hash_partitions_are_stable() {
        let p = Partitioning::StringHash { count: 10 };
        let key = KeyValue::Str("string-id-42".into());
        let first = p.partition_of(&key).unwrap();
        assert_eq!(first, p.partition_of(&key).unwrap());
        assert!(first < 10);
    }

    #[test]
    fn test_standard_registry() {
        let registry = TableRegistry::standard().unwrap();
        let names: Vec<_> = registry.tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["table1", "table2"]);

        let t2 = registry.get_table("table2").unwrap();
        assert_eq!(t2.source_name, "external.sourceSystemTable2");
        assert_eq!(t2.stored_schema().unwrap().len(), 3);
        assert_eq!(t2.key_format().unwrap(), KeyFormat::string_ids());
        assert_eq!(table1().key_format().unwrap(), KeyFormat::Int32);
        assert!(matches!(
            registry.get_table("table3"),
            Err(VerifyError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = TableRegistry::new();
        registry.add_tables([table1()]).unwrap();
        assert!(registry.add_tables([table1()]).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_object_size() {
        let table = table1().with_options(TableOptions {
            max_object_size: 0,
            ..TableOptions::default()
        });
        assert!(matches!(
            table.validate(),
            Err(VerifyError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_order_column() {
        let mut table = table1();
        table.order_column = Some(EVENT_COLUMN.to_string());
        assert!(matches!(
            table.validate(),
            Err(VerifyError::Configuration(_))
        ));
    }
}
