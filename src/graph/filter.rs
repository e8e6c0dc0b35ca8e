//! Filter node: a predicate gating downstream Actions.

use super::resolver::RowResolver;
use crate::error::RunError;
use crate::slot::{FilterSlot, SlotId};
use crate::value::Value;
use std::sync::Arc;

type Predicate = dyn Fn(&[Value]) -> Result<bool, RunError> + Send + Sync;

pub struct FilterNode {
    name: Option<String>,
    parent: Option<Arc<FilterNode>>,
    columns: Vec<String>,
    predicate: Box<Predicate>,
    slots: Vec<FilterSlot>,
}

impl FilterNode {
    pub fn new(
        name: Option<String>,
        parent: Option<Arc<FilterNode>>,
        columns: Vec<String>,
        predicate: Box<Predicate>,
        n_slots: usize,
    ) -> Self {
        FilterNode {
            name,
            parent,
            columns,
            predicate,
            slots: (0..n_slots.max(1)).map(|_| FilterSlot::new()).collect(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent(&self) -> Option<&Arc<FilterNode>> {
        self.parent.as_ref()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn accepted(&self, slot: SlotId) -> u64 {
        self.slots[slot].accepted()
    }

    pub fn rejected(&self, slot: SlotId) -> u64 {
        self.slots[slot].rejected()
    }

    pub fn total_accepted(&self) -> u64 {
        self.slots.iter().map(FilterSlot::accepted).sum()
    }

    pub fn total_rejected(&self) -> u64 {
        self.slots.iter().map(FilterSlot::rejected).sum()
    }

    /// `checkFilters(slot,row)`: memoized, short-circuiting on the
    /// parent chain. A rejecting ancestor is memoized as a rejection here
    /// too, without invoking this filter's own predicate.
    pub fn check(&self, row: usize, resolver: &mut RowResolver) -> Result<bool, RunError> {
        let slot = resolver.slot();
        let slot_state = &self.slots[slot];
        if let Some(memo) = slot_state.memoized(row) {
            return Ok(memo);
        }
        if let Some(parent) = &self.parent {
            if !parent.check(row, resolver)? {
                slot_state.record(row, false);
                return Ok(false);
            }
        }
        let inputs = resolver.values(row, &self.columns)?;
        let result = (self.predicate)(&inputs)?;
        slot_state.record(row, result);
        Ok(result)
    }
}

/// Walk an optional upstream Filter chain, gating on all ancestors. `None`
/// (an action booked directly off the root) always passes.
pub fn check_chain(
    parent: Option<&Arc<FilterNode>>,
    row: usize,
    resolver: &mut RowResolver,
) -> Result<bool, RunError> {
    match parent {
        Some(f) => f.check(row, resolver),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ColumnCursor;
    use std::collections::HashMap;

    struct ConstCursor(Vec<Value>);
    impl ColumnCursor for ConstCursor {
        fn value_at(&mut self, row: usize) -> Result<Value, RunError> {
            Ok(self.0[row].clone())
        }
    }

    #[test]
    fn short_circuits_on_rejecting_parent() {
        let parent = Arc::new(FilterNode::new(
            Some("parent".into()),
            None,
            vec!["x".into()],
            Box::new(|v| Ok(matches!(&v[0], Value::Int32(n) if *n > 2))),
            1,
        ));
        let child_calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&child_calls);
        let child = FilterNode::new(
            Some("child".into()),
            Some(Arc::clone(&parent)),
            vec!["x".into()],
            Box::new(move |_v| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(true)
            }),
            1,
        );

        let mut cursors: HashMap<String, Box<dyn ColumnCursor>> = HashMap::new();
        cursors.insert("x".into(), Box::new(ConstCursor(vec![Value::Int32(1), Value::Int32(9)])));
        let derived = HashMap::new();
        let mut resolver = RowResolver::new(0, &mut cursors, &derived);

        assert_eq!(child.check(0, &mut resolver).unwrap(), false);
        assert_eq!(child_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        assert_eq!(child.check(1, &mut resolver).unwrap(), true);
        assert_eq!(child_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn memoizes_same_row_without_reinvoking_predicate() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&calls);
        let filter = FilterNode::new(
            None,
            None,
            vec!["x".into()],
            Box::new(move |v| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(matches!(&v[0], Value::Int32(n) if *n % 2 == 0))
            }),
            1,
        );
        let mut cursors: HashMap<String, Box<dyn ColumnCursor>> = HashMap::new();
        cursors.insert("x".into(), Box::new(ConstCursor(vec![Value::Int32(4)])));
        let derived = HashMap::new();
        let mut resolver = RowResolver::new(0, &mut cursors, &derived);

        assert!(filter.check(0, &mut resolver).unwrap());
        assert!(filter.check(0, &mut resolver).unwrap());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(filter.accepted(0), 1);
    }
}
