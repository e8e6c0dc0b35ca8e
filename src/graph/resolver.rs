use super::derived::DerivedColumnNode;
use crate::error::RunError;
use crate::slot::SlotId;
use crate::source::ColumnCursor;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves column names to values for one (slot,row) during a run: either
/// delegates to a registered DerivedColumn or reads the slot's physical
/// cursor.
pub struct RowResolver<'a> {
    slot: SlotId,
    cursors: &'a mut HashMap<String, Box<dyn ColumnCursor>>,
    derived: &'a HashMap<String, Arc<DerivedColumnNode>>,
}

impl<'a> RowResolver<'a> {
    pub fn new(
        slot: SlotId,
        cursors: &'a mut HashMap<String, Box<dyn ColumnCursor>>,
        derived: &'a HashMap<String, Arc<DerivedColumnNode>>,
    ) -> Self {
        RowResolver { slot, cursors, derived }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Resolve one column's value at `row`: delegate to a DerivedColumn if
    /// the name is registered as one, else read the slot's physical cursor.
    pub fn value(&mut self, row: usize, name: &str) -> Result<Arc<Value>, RunError> {
        if let Some(derived) = self.derived.get(name).cloned() {
            return derived.value(row, self);
        }
        let cursor = self
            .cursors
            .get_mut(name)
            .ok_or_else(|| RunError::SourceUnavailable(format!("no cursor opened for column '{name}'")))?;
        Ok(Arc::new(cursor.value_at(row)?))
    }

    /// Resolve a column-name list, in order, into owned values.
    pub fn values(&mut self, row: usize, names: &[String]) -> Result<Vec<Value>, RunError> {
        names.iter().map(|n| self.value(row, n).map(|v| (*v).clone())).collect()
    }
}
