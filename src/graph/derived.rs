//! DerivedColumn node: a pure expression registering a new column visible
//! to downstream nodes.

use super::resolver::RowResolver;
use crate::error::RunError;
use crate::slot::DerivedSlot;
use crate::value::{Value, ValueType};
use std::sync::Arc;

type Expr = dyn Fn(&[Value]) -> Result<Value, RunError> + Send + Sync;

pub struct DerivedColumnNode {
    name: String,
    output_type: ValueType,
    columns: Vec<String>,
    expr: Box<Expr>,
    slots: Vec<DerivedSlot<Value>>,
}

impl DerivedColumnNode {
    pub fn new(
        name: impl Into<String>,
        output_type: ValueType,
        columns: Vec<String>,
        expr: Box<Expr>,
        n_slots: usize,
    ) -> Self {
        DerivedColumnNode {
            name: name.into(),
            output_type,
            columns,
            expr,
            slots: (0..n_slots.max(1)).map(|_| DerivedSlot::new()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_type(&self) -> ValueType {
        self.output_type
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Resolve this column's value at `row` on the resolver's slot,
    /// computing and caching it at most once per (slot,row).
    pub fn value(&self, row: usize, resolver: &mut RowResolver) -> Result<Arc<Value>, RunError> {
        let slot = resolver.slot();
        self.slots[slot].try_get_or_compute(row, || {
            let inputs = resolver.values(row, &self.columns)?;
            (self.expr)(&inputs)
        })
    }
}
