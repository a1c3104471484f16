//! Batch Encoder
//!
//! Turns a row-oriented [`Batch`] into the column-oriented Arrow `RecordBatch` the insertion
//! API accepts (one contiguous array per field, in schema order), and back.

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int32Array,
    Int32Builder, StringArray, StringBuilder,
};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::dataset::{Batch, FieldType, Row, Schema, Value};
use crate::error::{Result, VerifyError};

/// Columnar record handed to the insertion API.
pub type WireRecord = RecordBatch;

/// Encode `batch` against the declared `schema`.
///
/// Every row must have exactly one value per field with the field's type.
pub fn encode(batch: &Batch, schema: &Schema) -> Result<WireRecord> {
    encode_rows(&batch.rows, schema)
}

pub fn encode_rows(rows: &[Row], schema: &Schema) -> Result<WireRecord> {
    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != schema.len() {
            return Err(VerifyError::SchemaMismatch(format!(
                "row {} has {} fields, schema declares {}",
                row_idx,
                row.len(),
                schema.len()
            )));
        }
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    for (col_idx, field) in schema.fields().iter().enumerate() {
        let mismatch = |row_idx: usize, value: &Value| {
            VerifyError::SchemaMismatch(format!(
                "row {} column '{}': expected {}, got {}",
                row_idx,
                field.name,
                field.field_type,
                value.field_type()
            ))
        };

        let column: ArrayRef = match field.field_type {
            FieldType::Int32 => {
                let mut builder = Int32Builder::with_capacity(rows.len());
                for (row_idx, row) in rows.iter().enumerate() {
                    match &row.0[col_idx] {
                        Value::Int32(v) => builder.append_value(*v),
                        other => return Err(mismatch(row_idx, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            FieldType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for (row_idx, row) in rows.iter().enumerate() {
                    match &row.0[col_idx] {
                        Value::Boolean(v) => builder.append_value(*v),
                        other => return Err(mismatch(row_idx, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            FieldType::Float64 => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for (row_idx, row) in rows.iter().enumerate() {
                    match &row.0[col_idx] {
                        Value::Float64(v) => builder.append_value(*v),
                        other => return Err(mismatch(row_idx, other)),
                    }
                }
                Arc::new(builder.finish())
            }
            FieldType::Utf8 => {
                let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 16);
                for (row_idx, row) in rows.iter().enumerate() {
                    match &row.0[col_idx] {
                        Value::Utf8(v) => builder.append_value(v),
                        other => return Err(mismatch(row_idx, other)),
                    }
                }
                Arc::new(builder.finish())
            }
        };
        columns.push(column);
    }

    let record = RecordBatch::try_new(Arc::new(schema.to_arrow()), columns)?;
    Ok(record)
}

/// Decode a record back into rows, checking it against `schema` by column name and type.
///
/// Columns are located by name, so a record whose columns are a reordered superset of
/// `schema` decodes fine. Null values are rejected.
pub fn decode(record: &RecordBatch, schema: &Schema) -> Result<Vec<Row>> {
    let mut columns: Vec<Vec<Value>> = Vec::with_capacity(schema.len());

    for field in schema.fields() {
        let array = record.column_by_name(&field.name).ok_or_else(|| {
            VerifyError::SchemaMismatch(format!("record is missing column '{}'", field.name))
        })?;
        if array.null_count() > 0 {
            return Err(VerifyError::SchemaMismatch(format!(
                "column '{}' contains {} null(s)",
                field.name,
                array.null_count()
            )));
        }
        let wrong_type = || {
            VerifyError::SchemaMismatch(format!(
                "column '{}' is {}, expected {}",
                field.name,
                array.data_type(),
                field.field_type
            ))
        };

        let values: Vec<Value> = match field.field_type {
            FieldType::Int32 => array
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(wrong_type)?
                .values()
                .iter()
                .map(|v| Value::Int32(*v))
                .collect(),
            FieldType::Boolean => {
                let arr = array
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(wrong_type)?;
                (0..arr.len()).map(|i| Value::Boolean(arr.value(i))).collect()
            }
            FieldType::Float64 => array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(wrong_type)?
                .values()
                .iter()
                .map(|v| Value::Float64(*v))
                .collect(),
            FieldType::Utf8 => {
                let arr = array
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(wrong_type)?;
                (0..arr.len())
                    .map(|i| Value::Utf8(arr.value(i).to_string()))
                    .collect()
            }
        };
        columns.push(values);
    }

    let mut rows: Vec<Row> = (0..record.num_rows())
        .map(|_| Row(Vec::with_capacity(schema.len())))
        .collect();
    for column in columns {
        for (row, value) in rows.iter_mut().zip(column) {
            row.0.push(value);
        }
    }
    Ok(rows)
}
