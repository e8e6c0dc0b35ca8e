//! Type dispatcher: resolves an omitted column element type against input
//! metadata at action-booking time, bridging the engine's closed runtime
//! `Value` representation to a statically typed caller.
//!
//! Min/Max/Mean/Take/Histo1D all accept an optional explicit element type;
//! when omitted, this module looks the column up in input metadata (or, for
//! a derived column, its registered output type) and resolves it against
//! the closed inferable set (`ValueType::is_inferable`). Failure here is a
//! `BookingError::CannotInferType`, raised before `run`, never during it.

use crate::error::BookingError;
use crate::graph::DerivedColumnNode;
use crate::source::ColumnSource;
use crate::value::ValueType;

/// Resolve `name`'s element type: `explicit` if given, else the registered
/// output type of a derived column of that name (if `name` resolves to one
/// visible at the calling chain position), else the physical column's
/// inferred type.
pub fn resolve_column_type(
    name: &str,
    explicit: Option<ValueType>,
    source: &dyn ColumnSource,
    derived: Option<&DerivedColumnNode>,
) -> Result<ValueType, BookingError> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    if let Some(d) = derived {
        return Ok(d.output_type());
    }
    let meta = source
        .column_meta(name)
        .ok_or_else(|| BookingError::UnknownColumn(name.to_string()))?;
    if !meta.value_type.is_inferable() {
        return Err(BookingError::CannotInferType(name.to_string()));
    }
    Ok(meta.value_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ColumnMeta;

    struct FakeSource(Vec<ColumnMeta>);
    impl ColumnSource for FakeSource {
        fn row_count(&self) -> usize {
            0
        }
        fn schema(&self) -> &[ColumnMeta] {
            &self.0
        }
        fn open_cursor(
            &self,
            _slot: usize,
            _column: &str,
        ) -> Result<Box<dyn crate::source::ColumnCursor>, crate::error::RunError> {
            unreachable!()
        }
    }

    #[test]
    fn explicit_type_wins_over_inference() {
        let source = FakeSource(vec![ColumnMeta {
            name: "x".into(),
            value_type: ValueType::Int32,
        }]);
        let resolved = resolve_column_type("x", Some(ValueType::Float64), &source, None).unwrap();
        assert_eq!(resolved, ValueType::Float64);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let source = FakeSource(vec![]);
        assert!(matches!(
            resolve_column_type("missing", None, &source, None),
            Err(BookingError::UnknownColumn(_))
        ));
    }

    #[test]
    fn uninferable_physical_type_is_rejected() {
        let source = FakeSource(vec![ColumnMeta {
            name: "x".into(),
            value_type: ValueType::Record,
        }]);
        assert!(matches!(
            resolve_column_type("x", None, &source, None),
            Err(BookingError::CannotInferType(_))
        ));
    }

    #[test]
    fn derived_output_type_wins_over_physical_inference() {
        let source = FakeSource(vec![]);
        let node = DerivedColumnNode::new(
            "y",
            ValueType::Float64,
            vec!["x".into()],
            Box::new(|v| Ok(v[0].clone())),
            1,
        );
        let resolved = resolve_column_type("y", None, &source, Some(&node)).unwrap();
        assert_eq!(resolved, ValueType::Float64);
    }
}
