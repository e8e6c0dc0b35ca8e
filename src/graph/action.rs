//! Action taxonomy: terminal graph nodes producing a user-visible
//! aggregate. Each variant holds a per-slot partial and a merge rule that
//! combines the partials into the published result.

use super::filter::{check_chain, FilterNode};
use super::resolver::RowResolver;
use crate::error::RunError;
use crate::execution::{MemoryTracker, ResourceLimits};
use crate::histogram::Histogram;
use crate::slot::SlotId;
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Common contract for every terminal node: ask the upstream Filter chain,
/// and if it passes, materialize declared inputs and update per-slot
/// partial state. `merge` runs exactly once, single-threaded, after the row
/// pass.
pub trait Action: Send + Sync {
    fn upstream(&self) -> Option<&Arc<FilterNode>>;
    fn columns(&self) -> &[String];

    fn visit_row(&self, row: usize, resolver: &mut RowResolver) -> Result<(), RunError> {
        if !check_chain(self.upstream(), row, resolver)? {
            return Ok(());
        }
        let inputs = resolver.values(row, self.columns())?;
        self.accept(resolver.slot(), &inputs)
    }

    fn accept(&self, slot: SlotId, inputs: &[Value]) -> Result<(), RunError>;

    fn merge(&self);

    /// Clear per-slot partial state back to its seed. Called once before
    /// every row pass so that re-running the engine (`run()` is idempotent
    /// in effect — a later call re-executes the full pass rather than
    /// accumulating onto the previous one) reproduces the same aggregate
    /// rather than compounding it.
    fn reset(&self) {}
}

/// `Foreach(fn)`: instant side effect, no partial, no merge.
pub struct ForeachAction<F> {
    pub upstream: Option<Arc<FilterNode>>,
    pub columns: Vec<String>,
    pub callable: F,
}

impl<F> Action for ForeachAction<F>
where
    F: Fn(&[Value]) -> Result<(), RunError> + Send + Sync,
{
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &self.columns
    }
    fn accept(&self, _slot: SlotId, inputs: &[Value]) -> Result<(), RunError> {
        (self.callable)(inputs)
    }
    fn merge(&self) {}
}

/// `ForeachSlot(fn)`: instant side effect, slot index passed to the
/// callable; no partial, no merge.
pub struct ForeachSlotAction<F> {
    pub upstream: Option<Arc<FilterNode>>,
    pub columns: Vec<String>,
    pub callable: F,
}

impl<F> Action for ForeachSlotAction<F>
where
    F: Fn(SlotId, &[Value]) -> Result<(), RunError> + Send + Sync,
{
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &self.columns
    }
    fn accept(&self, slot: SlotId, inputs: &[Value]) -> Result<(), RunError> {
        (self.callable)(slot, inputs)
    }
    fn merge(&self) {}
}

/// `Count()`: per-slot counter, merge sums across slots.
pub struct CountAction {
    pub upstream: Option<Arc<FilterNode>>,
    per_slot: Vec<AtomicU64>,
    result: Arc<Mutex<u64>>,
}

impl CountAction {
    pub fn new(upstream: Option<Arc<FilterNode>>, n_slots: usize, result: Arc<Mutex<u64>>) -> Self {
        CountAction {
            upstream,
            per_slot: (0..n_slots.max(1)).map(|_| AtomicU64::new(0)).collect(),
            result,
        }
    }
}

impl Action for CountAction {
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &[]
    }
    fn accept(&self, slot: SlotId, _inputs: &[Value]) -> Result<(), RunError> {
        self.per_slot[slot].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
    fn merge(&self) {
        let total: u64 = self.per_slot.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        *self.result.lock() = total;
    }
    fn reset(&self) {
        for c in &self.per_slot {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// `Reduce(f, col[, init])`: per-slot partial seeded with `init`, folded
/// with `f` per row; merge folds the per-slot partials with `f` again,
/// starting from `init` (associativity of `f` is assumed, not checked).
pub struct ReduceAction<T, F> {
    pub upstream: Option<Arc<FilterNode>>,
    pub columns: Vec<String>,
    init: T,
    f: F,
    extract: Box<dyn Fn(&Value) -> Result<T, RunError> + Send + Sync>,
    per_slot: Vec<Mutex<T>>,
    result: Arc<Mutex<T>>,
}

impl<T, F> ReduceAction<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T, T) -> T + Send + Sync,
{
    pub fn new(
        upstream: Option<Arc<FilterNode>>,
        columns: Vec<String>,
        init: T,
        f: F,
        extract: Box<dyn Fn(&Value) -> Result<T, RunError> + Send + Sync>,
        n_slots: usize,
        result: Arc<Mutex<T>>,
    ) -> Self {
        let per_slot = (0..n_slots.max(1)).map(|_| Mutex::new(init.clone())).collect();
        ReduceAction {
            upstream,
            columns,
            init,
            f,
            extract,
            per_slot,
            result,
        }
    }
}

impl<T, F> Action for ReduceAction<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T, T) -> T + Send + Sync,
{
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &self.columns
    }
    fn accept(&self, slot: SlotId, inputs: &[Value]) -> Result<(), RunError> {
        let value = (self.extract)(&inputs[0])?;
        let mut partial = self.per_slot[slot].lock();
        *partial = (self.f)(partial.clone(), value);
        Ok(())
    }
    fn merge(&self) {
        let folded = self
            .per_slot
            .iter()
            .fold(self.init.clone(), |acc, partial| (self.f)(acc, partial.lock().clone()));
        *self.result.lock() = folded;
    }
    fn reset(&self) {
        for partial in &self.per_slot {
            *partial.lock() = self.init.clone();
        }
    }
}

/// `Take(col)`: per-slot appended vector, merge concatenates in slot-id
/// order. Within a slot, rows are visited in ascending order, so append
/// order already matches row order.
pub struct TakeAction<T> {
    pub upstream: Option<Arc<FilterNode>>,
    pub columns: Vec<String>,
    extract: Box<dyn Fn(&Value) -> Result<T, RunError> + Send + Sync>,
    per_slot: Vec<Mutex<Vec<T>>>,
    result: Arc<Mutex<Vec<T>>>,
    limits: ResourceLimits,
    memory: Arc<MemoryTracker>,
}

impl<T> TakeAction<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        upstream: Option<Arc<FilterNode>>,
        columns: Vec<String>,
        extract: Box<dyn Fn(&Value) -> Result<T, RunError> + Send + Sync>,
        n_slots: usize,
        result: Arc<Mutex<Vec<T>>>,
        limits: ResourceLimits,
        memory: Arc<MemoryTracker>,
    ) -> Self {
        TakeAction {
            upstream,
            columns,
            extract,
            per_slot: (0..n_slots.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
            result,
            limits,
            memory,
        }
    }
}

impl<T> Action for TakeAction<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &self.columns
    }
    fn accept(&self, slot: SlotId, inputs: &[Value]) -> Result<(), RunError> {
        let value = (self.extract)(&inputs[0])?;
        let mut partial = self.per_slot[slot].lock();
        partial.push(value);
        self.limits.check_buffer("take", partial.len())?;
        self.memory.record(std::mem::size_of::<T>())?;
        Ok(())
    }
    fn merge(&self) {
        let mut out = Vec::new();
        for partial in &self.per_slot {
            out.extend(partial.lock().iter().cloned());
        }
        *self.result.lock() = out;
    }
    fn reset(&self) {
        for partial in &self.per_slot {
            partial.lock().clear();
        }
        self.memory.reset();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMaxKind {
    Min,
    Max,
}

/// `Min(col)` / `Max(col)`: per-slot running extremum, merge folds with the
/// same operator. An empty slot partial is seeded with `+inf`/`-inf`, which
/// is also the published result when no row ever reaches the action.
pub struct MinMaxAction {
    pub upstream: Option<Arc<FilterNode>>,
    pub columns: Vec<String>,
    kind: MinMaxKind,
    per_slot: Vec<Mutex<f64>>,
    result: Arc<Mutex<f64>>,
}

impl MinMaxAction {
    fn seed(kind: MinMaxKind) -> f64 {
        match kind {
            MinMaxKind::Min => f64::INFINITY,
            MinMaxKind::Max => f64::NEG_INFINITY,
        }
    }

    pub fn new(
        kind: MinMaxKind,
        upstream: Option<Arc<FilterNode>>,
        columns: Vec<String>,
        n_slots: usize,
        result: Arc<Mutex<f64>>,
    ) -> Self {
        let seed = Self::seed(kind);
        MinMaxAction {
            upstream,
            columns,
            kind,
            per_slot: (0..n_slots.max(1)).map(|_| Mutex::new(seed)).collect(),
            result,
        }
    }
}

impl Action for MinMaxAction {
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &self.columns
    }
    fn accept(&self, slot: SlotId, inputs: &[Value]) -> Result<(), RunError> {
        let v = inputs[0]
            .as_f64()
            .ok_or_else(|| RunError::UserCallableThrew(format!("{:?} is not numeric", inputs[0].value_type())))?;
        let mut partial = self.per_slot[slot].lock();
        *partial = match self.kind {
            MinMaxKind::Min => partial.min(v),
            MinMaxKind::Max => partial.max(v),
        };
        Ok(())
    }
    fn merge(&self) {
        let folded = self.per_slot.iter().fold(Self::seed(self.kind), |acc, partial| {
            let v = *partial.lock();
            match self.kind {
                MinMaxKind::Min => acc.min(v),
                MinMaxKind::Max => acc.max(v),
            }
        });
        *self.result.lock() = folded;
    }
    fn reset(&self) {
        let seed = Self::seed(self.kind);
        for partial in &self.per_slot {
            *partial.lock() = seed;
        }
    }
}

/// `Mean(col)`: per-slot (sum, count), merge combines sums and counts
/// before dividing. Yields `0.0` for an empty input, chosen to avoid
/// propagating `NaN`.
pub struct MeanAction {
    pub upstream: Option<Arc<FilterNode>>,
    pub columns: Vec<String>,
    per_slot: Vec<Mutex<(f64, u64)>>,
    result: Arc<Mutex<f64>>,
}

impl MeanAction {
    pub fn new(upstream: Option<Arc<FilterNode>>, columns: Vec<String>, n_slots: usize, result: Arc<Mutex<f64>>) -> Self {
        MeanAction {
            upstream,
            columns,
            per_slot: (0..n_slots.max(1)).map(|_| Mutex::new((0.0, 0u64))).collect(),
            result,
        }
    }
}

impl Action for MeanAction {
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &self.columns
    }
    fn accept(&self, slot: SlotId, inputs: &[Value]) -> Result<(), RunError> {
        let v = inputs[0]
            .as_f64()
            .ok_or_else(|| RunError::UserCallableThrew(format!("{:?} is not numeric", inputs[0].value_type())))?;
        let mut partial = self.per_slot[slot].lock();
        partial.0 += v;
        partial.1 += 1;
        Ok(())
    }
    fn merge(&self) {
        let (sum, count) = self
            .per_slot
            .iter()
            .fold((0.0, 0u64), |acc, p| {
                let p = p.lock();
                (acc.0 + p.0, acc.1 + p.1)
            });
        *self.result.lock() = if count == 0 { 0.0 } else { sum / count as f64 };
    }
    fn reset(&self) {
        for partial in &self.per_slot {
            *partial.lock() = (0.0, 0u64);
        }
    }
}

/// Per-slot state for a histogram Action: either a directly filled
/// histogram (fixed axis limits), or a buffer of raw fill tuples awaiting
/// the deferred-limits merge (1D only).
enum HistoSlotState {
    Direct(Box<dyn Histogram>),
    Buffered(Vec<(f64, f64, f64, f64)>),
}

/// `Histo1D`/`Histo2D`/`Histo3D` [weighted]: per-slot histogram clone (or,
/// for 1D with unset axis limits, a buffered value list); merge is bin-wise
/// `Add`, or — in buffered mode — a single fill pass after computing the
/// union extrema across all slots.
pub struct HistoAction {
    pub upstream: Option<Arc<FilterNode>>,
    pub columns: Vec<String>,
    arity: u8,
    weighted: bool,
    deferred: bool,
    model: Box<dyn Histogram>,
    per_slot: Vec<Mutex<HistoSlotState>>,
    result: Arc<Mutex<Arc<dyn Histogram>>>,
    limits: ResourceLimits,
    memory: Arc<MemoryTracker>,
}

impl HistoAction {
    pub fn new(
        upstream: Option<Arc<FilterNode>>,
        columns: Vec<String>,
        arity: u8,
        weighted: bool,
        model: Box<dyn Histogram>,
        n_slots: usize,
        result: Arc<Mutex<Arc<dyn Histogram>>>,
        limits: ResourceLimits,
        memory: Arc<MemoryTracker>,
    ) -> Self {
        let deferred = arity == 1 && !model.has_axis_limits();
        let per_slot = (0..n_slots.max(1))
            .map(|_| {
                Mutex::new(if deferred {
                    HistoSlotState::Buffered(Vec::new())
                } else {
                    HistoSlotState::Direct(model.clone_empty())
                })
            })
            .collect();
        HistoAction {
            upstream,
            columns,
            arity,
            weighted,
            deferred,
            model,
            per_slot,
            result,
            limits,
            memory,
        }
    }

    fn coords(&self, inputs: &[Value]) -> Result<(f64, f64, f64, f64), RunError> {
        let numeric = |v: &Value| {
            v.as_f64()
                .ok_or_else(|| RunError::UserCallableThrew(format!("{:?} is not numeric", v.value_type())))
        };
        let x = numeric(&inputs[0])?;
        let y = if self.arity >= 2 { numeric(&inputs[1])? } else { 0.0 };
        let z = if self.arity >= 3 { numeric(&inputs[2])? } else { 0.0 };
        let weight_idx = self.arity as usize;
        let w = if self.weighted { numeric(&inputs[weight_idx])? } else { 1.0 };
        Ok((x, y, z, w))
    }
}

impl Action for HistoAction {
    fn upstream(&self) -> Option<&Arc<FilterNode>> {
        self.upstream.as_ref()
    }
    fn columns(&self) -> &[String] {
        &self.columns
    }
    fn accept(&self, slot: SlotId, inputs: &[Value]) -> Result<(), RunError> {
        let (x, y, z, w) = self.coords(inputs)?;
        let mut state = self.per_slot[slot].lock();
        match &mut *state {
            HistoSlotState::Direct(h) => {
                match self.arity {
                    1 => h.fill1_weighted(x, w),
                    2 => h.fill2_weighted(x, y, w),
                    _ => h.fill3_weighted(x, y, z, w),
                }
                Ok(())
            }
            HistoSlotState::Buffered(buf) => {
                buf.push((x, y, z, w));
                self.limits.check_buffer("histogram-deferred", buf.len())?;
                self.memory.record(std::mem::size_of::<(f64, f64, f64, f64)>())?;
                Ok(())
            }
        }
    }
    fn merge(&self) {
        if self.deferred {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for state in &self.per_slot {
                if let HistoSlotState::Buffered(buf) = &*state.lock() {
                    for (x, _, _, _) in buf {
                        min = min.min(*x);
                        max = max.max(*x);
                    }
                }
            }
            if !min.is_finite() || !max.is_finite() || min >= max {
                min = 0.0;
                max = 1.0;
            }
            let mut histo = self.model.clone_empty();
            histo.set_can_extend_all_axes();
            for state in &self.per_slot {
                if let HistoSlotState::Buffered(buf) = &*state.lock() {
                    for (x, _, _, w) in buf {
                        histo.fill1_weighted(*x, *w);
                    }
                }
            }
            *self.result.lock() = Arc::from(histo);
            return;
        }

        let mut combined = self.model.clone_empty();
        for state in &self.per_slot {
            if let HistoSlotState::Direct(h) = &*state.lock() {
                combined.add(h.as_ref());
            }
        }
        *self.result.lock() = Arc::from(combined);
    }
    fn reset(&self) {
        for state in &self.per_slot {
            let mut state = state.lock();
            *state = if self.deferred {
                HistoSlotState::Buffered(Vec::new())
            } else {
                HistoSlotState::Direct(self.model.clone_empty())
            };
        }
        self.memory.reset();
    }
}
