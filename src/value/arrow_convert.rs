//! Arrow Conversion Utilities
//!
//! Bridges Arrow's columnar array types to the engine's runtime [`Value`]
//! representation. This is the seam the reference `source::arrow_source`
//! provider uses to produce per-row values out of a `RecordBatch`; the core
//! engine never touches Arrow directly outside this module.

use super::Value;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, Int8Array,
    LargeListArray, ListArray, UInt8Array,
};
use arrow::datatypes::DataType as ArrowType;
use std::sync::Arc;

/// Error converting an Arrow array into the engine's value representation.
#[derive(Debug, thiserror::Error)]
pub enum ArrowConvertError {
    #[error("unsupported arrow type for column values: {0:?}")]
    UnsupportedType(ArrowType),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Convert every row of one Arrow array into a [`Value`], failing if any
/// row is null. Convenience wrapper over
/// [`array_to_values_allowing_nulls`] for callers that don't need to
/// distinguish null rows.
pub fn array_to_values(array: &ArrayRef) -> Result<Vec<Value>, ArrowConvertError> {
    array_to_values_allowing_nulls(array)?
        .into_iter()
        .map(|v| v.ok_or_else(|| ArrowConvertError::UnsupportedType(array.data_type().clone())))
        .collect()
}

/// Convert every row of one Arrow array into `Some(Value)`, or `None` where
/// the array's null bitmap marks that row absent. Used by the reference
/// column source, which surfaces a null array-valued row as
/// `RunError::NonContiguousArray` — there is no contiguous buffer to view
/// for an absent row.
pub fn array_to_values_allowing_nulls(array: &ArrayRef) -> Result<Vec<Option<Value>>, ArrowConvertError> {
    match array.data_type() {
        ArrowType::Int8 => {
            let a = array.as_any().downcast_ref::<Int8Array>().expect("type checked above");
            Ok((0..a.len()).map(|i| (!a.is_null(i)).then(|| Value::Int8(a.value(i)))).collect())
        }
        ArrowType::Int32 => {
            let a = array.as_any().downcast_ref::<Int32Array>().expect("type checked above");
            Ok((0..a.len()).map(|i| (!a.is_null(i)).then(|| Value::Int32(a.value(i)))).collect())
        }
        ArrowType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().expect("type checked above");
            Ok((0..a.len()).map(|i| (!a.is_null(i)).then(|| Value::Int64(a.value(i)))).collect())
        }
        ArrowType::Float32 => {
            let a = array.as_any().downcast_ref::<Float32Array>().expect("type checked above");
            Ok((0..a.len()).map(|i| (!a.is_null(i)).then(|| Value::Float32(a.value(i)))).collect())
        }
        ArrowType::Float64 => {
            let a = array.as_any().downcast_ref::<Float64Array>().expect("type checked above");
            Ok((0..a.len()).map(|i| (!a.is_null(i)).then(|| Value::Float64(a.value(i)))).collect())
        }
        ArrowType::Boolean => {
            let a = array.as_any().downcast_ref::<BooleanArray>().expect("type checked above");
            Ok((0..a.len()).map(|i| (!a.is_null(i)).then(|| Value::Bool(a.value(i)))).collect())
        }
        ArrowType::UInt8 => {
            let a = array.as_any().downcast_ref::<UInt8Array>().expect("type checked above");
            Ok((0..a.len()).map(|i| (!a.is_null(i)).then(|| Value::Byte(a.value(i)))).collect())
        }
        ArrowType::List(field) => {
            let a = array.as_any().downcast_ref::<ListArray>().expect("type checked above");
            list_to_values(a, field.data_type())
        }
        ArrowType::LargeList(field) => {
            let a = array.as_any().downcast_ref::<LargeListArray>().expect("type checked above");
            large_list_to_values(a, field.data_type())
        }
        other => Err(ArrowConvertError::UnsupportedType(other.clone())),
    }
}

fn list_to_values(a: &ListArray, elem_type: &ArrowType) -> Result<Vec<Option<Value>>, ArrowConvertError> {
    (0..a.len())
        .map(|i| {
            if a.is_null(i) {
                return Ok(None);
            }
            row_to_vector_value(a.value(i), elem_type).map(Some)
        })
        .collect()
}

fn large_list_to_values(
    a: &LargeListArray,
    elem_type: &ArrowType,
) -> Result<Vec<Option<Value>>, ArrowConvertError> {
    (0..a.len())
        .map(|i| {
            if a.is_null(i) {
                return Ok(None);
            }
            row_to_vector_value(a.value(i), elem_type).map(Some)
        })
        .collect()
}

fn row_to_vector_value(row: ArrayRef, elem_type: &ArrowType) -> Result<Value, ArrowConvertError> {
    match elem_type {
        ArrowType::Float64 => {
            let a = row.as_any().downcast_ref::<Float64Array>().expect("type checked above");
            let data: Arc<[f64]> = Arc::from(a.values().to_vec());
            Ok(Value::VectorFloat64(data))
        }
        ArrowType::Float32 => {
            let a = row.as_any().downcast_ref::<Float32Array>().expect("type checked above");
            let data: Arc<[f32]> = Arc::from(a.values().to_vec());
            Ok(Value::VectorFloat32(data))
        }
        other => Err(ArrowConvertError::UnsupportedType(other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;

    #[test]
    fn converts_int32_array() {
        let arr: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        let values = array_to_values(&arr).unwrap();
        assert_eq!(values.len(), 3);
        assert!(matches!(values[1], Value::Int32(2)));
    }

    #[test]
    fn rejects_unsupported_type() {
        let arr: ArrayRef = Arc::new(arrow::array::StringArray::from(vec!["a"]));
        assert!(array_to_values(&arr).is_err());
    }

    #[test]
    fn null_rows_surface_as_none() {
        let arr: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), None, Some(3)]));
        let values = array_to_values_allowing_nulls(&arr).unwrap();
        assert!(values[0].is_some());
        assert!(values[1].is_none());
        assert!(values[2].is_some());
    }
}
