//! # Value Type System
//!
//! The closed set of scalar and array element types a column can carry, plus
//! the runtime [`Value`] used to pass one row's worth of a column into user
//! callables. Filters, derived columns, and actions all exchange values
//! through this type rather than through per-type generics at the booking
//! boundary — the type dispatcher (see [`crate::dispatch`]) is what bridges
//! this runtime representation back to a statically typed action
//! specialization.
//!
//! ## Usage
//!
//! ```rust
//! use crateflow::value::{Value, ValueType};
//!
//! let v = Value::Int32(7);
//! assert_eq!(v.value_type(), ValueType::Int32);
//! ```

pub mod arrow_convert;

pub use arrow_convert::{array_to_values, array_to_values_allowing_nulls, ArrowConvertError};

use std::sync::Arc;

/// The closed set of element types the engine understands.
///
/// The type dispatcher only ever resolves a column to one of these
/// variants, and [`ValueType::from_arrow`] is the single place that
/// mapping is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int8,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Byte,
    VectorFloat32,
    VectorFloat64,
    /// A user-visible record type produced by a derived column whose output
    /// is not one of the scalar/array types above. Never returned by the
    /// type dispatcher's inference — only reachable via an explicit
    /// `Define` output type annotation.
    Record,
}

impl ValueType {
    /// Map an Arrow storage descriptor onto the closed inferable set.
    ///
    /// Returns `None` when the Arrow type has no mapping, which the type
    /// dispatcher turns into `BookingError::CannotInferType`.
    pub fn from_arrow(dt: &arrow::datatypes::DataType) -> Option<Self> {
        use arrow::datatypes::DataType as ArrowType;
        match dt {
            ArrowType::Int8 => Some(ValueType::Int8),
            ArrowType::Int32 => Some(ValueType::Int32),
            ArrowType::Int64 => Some(ValueType::Int64),
            ArrowType::Float32 => Some(ValueType::Float32),
            ArrowType::Float64 => Some(ValueType::Float64),
            ArrowType::Boolean => Some(ValueType::Bool),
            ArrowType::UInt8 => Some(ValueType::Byte),
            ArrowType::List(field) | ArrowType::LargeList(field) => match field.data_type() {
                ArrowType::Float64 => Some(ValueType::VectorFloat64),
                ArrowType::Float32 => Some(ValueType::VectorFloat32),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether this type is one of the five the type dispatcher can infer
    /// without an explicit annotation.
    pub fn is_inferable(self) -> bool {
        matches!(
            self,
            ValueType::Int8
                | ValueType::Int32
                | ValueType::Float64
                | ValueType::VectorFloat64
                | ValueType::VectorFloat32
        )
    }
}

/// One row's value for one column, in the engine's runtime representation.
///
/// `DerivedColumn` caches store this behind an `Arc` so that every consumer
/// at the same (slot, row) observes the identical allocation.
#[derive(Debug, Clone)]
pub enum Value {
    Int8(i8),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Byte(u8),
    VectorFloat32(Arc<[f32]>),
    VectorFloat64(Arc<[f64]>),
    /// Opaque record produced by a derived column; downstream consumers must
    /// know the concrete type out of band (via `Any`-style downcasting is
    /// deliberately not provided here — derived columns that need a record
    /// type are expected to be consumed only by callables that were booked
    /// with knowledge of it).
    Record(Arc<dyn std::any::Any + Send + Sync>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int8(_) => ValueType::Int8,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::Bool(_) => ValueType::Bool,
            Value::Byte(_) => ValueType::Byte,
            Value::VectorFloat32(_) => ValueType::VectorFloat32,
            Value::VectorFloat64(_) => ValueType::VectorFloat64,
            Value::Record(_) => ValueType::Record,
        }
    }

    /// Coerce to `f64` for the numeric reduction actions (Min/Max/Mean,
    /// Histo fills). Returns `None` for non-numeric-scalar variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int8(v) => Some(f64::from(*v)),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            Value::Byte(v) => Some(f64::from(*v)),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::VectorFloat32(_) | Value::VectorFloat64(_) | Value::Record(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_round_trips() {
        assert_eq!(Value::Int32(1).value_type(), ValueType::Int32);
        assert_eq!(Value::Float64(1.0).value_type(), ValueType::Float64);
    }

    #[test]
    fn as_f64_covers_numeric_scalars() {
        assert_eq!(Value::Int8(3).as_f64(), Some(3.0));
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::VectorFloat64(Arc::from(vec![1.0])).as_f64(), None);
    }

    #[test]
    fn inferable_set_matches_closed_set() {
        assert!(ValueType::Int8.is_inferable());
        assert!(ValueType::Int32.is_inferable());
        assert!(ValueType::Float64.is_inferable());
        assert!(ValueType::VectorFloat64.is_inferable());
        assert!(ValueType::VectorFloat32.is_inferable());
        assert!(!ValueType::Int64.is_inferable());
        assert!(!ValueType::Record.is_inferable());
    }
}
