//! Synthetic Dataset Model
//!
//! Row, batch and schema types shared by the generator, the encoder, the local warehouse and
//! the validator, plus the [`Dataset`] capability every table-specific generator implements.
//!
//! A dataset is a finite, deterministic sequence of fixed-size batches. The same seed and sizing
//! always yields the same sequence, and [`Dataset::reset`] rewinds to the first batch so an
//! oracle can replay exactly what an insertion run submitted.

pub mod generator;

pub use generator::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, VerifyError};

// =============================================================================
// FIELD TYPES
// =============================================================================

/// Column types a synthetic table may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int32,
    Boolean,
    Float64,
    Utf8,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => write!(f, "int32"),
            Self::Boolean => write!(f, "boolean"),
            Self::Float64 => write!(f, "float64"),
            Self::Utf8 => write!(f, "utf8"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Sub-schema with the named columns, in the order given.
    pub fn project(&self, columns: &[String]) -> Result<Schema> {
        let fields = columns
            .iter()
            .map(|name| {
                self.field(name).cloned().ok_or_else(|| {
                    VerifyError::SchemaMismatch(format!("column '{}' not in schema", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }

    pub fn to_arrow(&self) -> arrow::datatypes::Schema {
        use arrow::datatypes::{DataType, Field as ArrowField};

        let fields: Vec<ArrowField> = self
            .fields
            .iter()
            .map(|f| {
                let data_type = match f.field_type {
                    FieldType::Int32 => DataType::Int32,
                    FieldType::Boolean => DataType::Boolean,
                    FieldType::Float64 => DataType::Float64,
                    FieldType::Utf8 => DataType::Utf8,
                };
                ArrowField::new(&f.name, data_type, false)
            })
            .collect();
        arrow::datatypes::Schema::new(fields)
    }

    /// Inverse of [`Schema::to_arrow`]; unsupported column types are a schema mismatch.
    pub fn from_arrow(schema: &arrow::datatypes::Schema) -> Result<Schema> {
        use arrow::datatypes::DataType;

        let fields = schema
            .fields()
            .iter()
            .map(|f| {
                let field_type = match f.data_type() {
                    DataType::Int32 => FieldType::Int32,
                    DataType::Boolean => FieldType::Boolean,
                    DataType::Float64 => FieldType::Float64,
                    DataType::Utf8 => FieldType::Utf8,
                    other => {
                        return Err(VerifyError::SchemaMismatch(format!(
                            "column '{}' has unsupported type {}",
                            f.name(),
                            other
                        )))
                    }
                };
                Ok(Field::new(f.name().as_str(), field_type))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }
}

// =============================================================================
// VALUES AND ROWS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int32(i32),
    Boolean(bool),
    Float64(f64),
    Utf8(String),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Int32(_) => FieldType::Int32,
            Self::Boolean(_) => FieldType::Boolean,
            Self::Float64(_) => FieldType::Float64,
            Self::Utf8(_) => FieldType::Utf8,
        }
    }

    /// Key projection of this value. Only integer and string columns can be keys.
    pub fn as_key(&self) -> Option<KeyValue> {
        match self {
            Self::Int32(v) => Some(KeyValue::Int(*v)),
            Self::Utf8(v) => Some(KeyValue::Str(v.clone())),
            _ => None,
        }
    }

    /// Integer view used for order/version columns.
    pub fn as_order(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::Utf8(v) => write!(f, "{}", v),
        }
    }
}

/// Hashable, totally ordered key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i32),
    Str(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One generator step: a fixed-size, ordered group of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Zero-based generator iteration that produced this batch.
    pub iteration: usize,
    pub rows: Vec<Row>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// DATASET CAPABILITY
// =============================================================================

/// A finite, replayable source of batches.
///
/// Implementations hold sequential state and are not meant to be shared between callers; the
/// insertion driver and the oracle each own their own instance.
pub trait Dataset: Send {
    /// Schema of every row this dataset produces.
    fn schema(&self) -> &Schema;

    /// True once every iteration has been produced.
    fn is_done(&self) -> bool;

    /// Rewind to the initial state so the identical sequence is produced again.
    fn reset(&mut self);

    /// Produce the next batch. Fails with `Exhausted` once [`Dataset::is_done`] is true.
    fn next_batch(&mut self) -> Result<Batch>;

    /// Total rows produced since construction or the last reset.
    fn rows_emitted(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Field::new("column1", FieldType::Int32),
            Field::new("column2", FieldType::Boolean),
            Field::new("eventName", FieldType::Utf8),
        ])
    }

    #[test]
    fn test_project_keeps_requested_order() {
        let schema = sample_schema();
        let projected = schema
            .project(&["eventName".to_string(), "column1".to_string()])
            .unwrap();
        assert_eq!(projected.fields()[0].name, "eventName");
        assert_eq!(projected.fields()[1].field_type, FieldType::Int32);
    }

    #[test]
    fn test_project_unknown_column_fails() {
        let err = sample_schema()
            .project(&["nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, VerifyError::SchemaMismatch(_)));
    }

    #[test]
    fn test_arrow_schema_conversion_is_reversible() {
        let schema = sample_schema();
        let back = Schema::from_arrow(&schema.to_arrow()).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn test_key_projection() {
        assert_eq!(Value::Int32(4).as_key(), Some(KeyValue::Int(4)));
        assert_eq!(
            Value::Utf8("string-id-9".into()).as_key(),
            Some(KeyValue::Str("string-id-9".into()))
        );
        assert_eq!(Value::Float64(1.0).as_key(), None);
        assert_eq!(Value::Int32(12).as_order(), Some(12));
    }
}
