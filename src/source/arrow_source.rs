//! Reference `ColumnSource`: an Arrow `RecordBatch`-backed column source.
//!
//! Columns are read out of Arrow arrays (optionally loaded from a Parquet
//! file via `parquet::arrow`'s reader) and materialized eagerly into the
//! engine's [`Value`] representation. This
//! keeps the reference cursor's `value_at` a plain index into an owned
//! vector rather than re-deriving Arrow accessors on every row.

use super::{ColumnCursor, ColumnMeta, ColumnSource};
use crate::error::RunError;
use crate::value::{Value, ValueType};
use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;

/// One materialized column: `Some(value)` per row, or `None` where the
/// underlying Arrow array was null (only meaningful for array-valued
/// columns — a null row there has no contiguous buffer to view).
#[derive(Debug, Clone)]
struct ColumnData {
    value_type: ValueType,
    rows: Arc<Vec<Option<Value>>>,
}

/// An in-memory, Arrow-backed `ColumnSource`.
pub struct ArrowColumnSource {
    schema: Vec<ColumnMeta>,
    columns: HashMap<String, ColumnData>,
    row_count: usize,
}

impl ArrowColumnSource {
    /// Build a source from an in-memory `RecordBatch`.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self, RunError> {
        let mut schema = Vec::with_capacity(batch.num_columns());
        let mut columns = HashMap::with_capacity(batch.num_columns());

        for (field, array) in batch.schema().fields().iter().zip(batch.columns()) {
            let value_type = ValueType::from_arrow(field.data_type()).ok_or_else(|| {
                RunError::SourceUnavailable(format!(
                    "column '{}' has unsupported arrow type {:?}",
                    field.name(),
                    field.data_type()
                ))
            })?;

            let rows = materialize_column(array)
                .map_err(|e| RunError::SourceUnavailable(format!("column '{}': {e}", field.name())))?;

            schema.push(ColumnMeta {
                name: field.name().clone(),
                value_type,
            });
            columns.insert(
                field.name().clone(),
                ColumnData {
                    value_type,
                    rows: Arc::new(rows),
                },
            );
        }

        Ok(ArrowColumnSource {
            schema,
            columns,
            row_count: batch.num_rows(),
        })
    }

    /// Load a source by eagerly reading an entire Parquet file into one
    /// `RecordBatch` (concatenating row groups).
    pub fn from_parquet_file(path: &std::path::Path) -> Result<Self, RunError> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = File::open(path)
            .map_err(|e| RunError::SourceUnavailable(format!("opening {}: {e}", path.display())))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| RunError::SourceUnavailable(e.to_string()))?
            .build()
            .map_err(|e| RunError::SourceUnavailable(e.to_string()))?;

        let batches: Vec<RecordBatch> = reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RunError::SourceUnavailable(e.to_string()))?;

        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| RunError::SourceUnavailable("parquet file has no row groups".into()))?;
        let combined = arrow::compute::concat_batches(&schema, &batches)
            .map_err(|e| RunError::SourceUnavailable(e.to_string()))?;

        Self::from_record_batch(&combined)
    }
}

fn materialize_column(array: &Arc<dyn Array>) -> Result<Vec<Option<Value>>, crate::value::ArrowConvertError> {
    let values = crate::value::array_to_values_allowing_nulls(array)?;
    Ok(values)
}

impl ColumnSource for ArrowColumnSource {
    fn row_count(&self) -> usize {
        self.row_count
    }

    fn schema(&self) -> &[ColumnMeta] {
        &self.schema
    }

    fn open_cursor(&self, _slot: usize, column: &str) -> Result<Box<dyn ColumnCursor>, RunError> {
        let data = self
            .columns
            .get(column)
            .ok_or_else(|| RunError::SourceUnavailable(format!("unknown column '{column}'")))?;

        let is_array = matches!(data.value_type, ValueType::VectorFloat32 | ValueType::VectorFloat64);

        Ok(Box::new(ArrowCursor {
            rows: Arc::clone(&data.rows),
            column: column.to_string(),
            is_array,
        }))
    }
}

struct ArrowCursor {
    rows: Arc<Vec<Option<Value>>>,
    column: String,
    is_array: bool,
}

impl ColumnCursor for ArrowCursor {
    fn value_at(&mut self, row: usize) -> Result<Value, RunError> {
        match self.rows.get(row) {
            Some(Some(v)) => Ok(v.clone()),
            Some(None) if self.is_array => Err(RunError::NonContiguousArray(self.column.clone())),
            Some(None) => Err(RunError::SourceUnavailable(format!(
                "column '{}' is null at row {row}",
                self.column
            ))),
            None => Err(RunError::SourceUnavailable(format!(
                "row {row} out of range for column '{}'",
                self.column
            ))),
        }
    }
}
