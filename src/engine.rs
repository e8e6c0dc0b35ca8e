//! The Engine: owns the booked graph, assigns slots, iterates the input,
//! and dispatches per-row work. Rows are partitioned across
//! `nSlots` rayon workers; merge is single-threaded, performed in slot-id
//! order where order matters (`Take`, buffered histogram fill order).

use crate::dispatch::resolve_column_type;
use crate::error::{BookingError, EngineError, LifecycleError, RunError};
use crate::execution::{MemoryTracker, RunConfig};
use crate::graph::action::{
    Action, CountAction, ForeachAction, ForeachSlotAction, HistoAction, MeanAction, MinMaxAction, MinMaxKind,
    ReduceAction, TakeAction,
};
use crate::graph::{DerivedColumnNode, FilterNode, RowResolver};
use crate::histogram::Histogram;
use crate::result::ResultHandle;
use crate::slot::SlotId;
use crate::source::{ColumnCursor, ColumnSource};
use crate::value::{Value, ValueType};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared engine state. Always accessed through the `Engine` handle, which
/// is a thin `Arc` wrapper; chain-builder positions ([`Chain`]) hold a
/// strong reference to it for the duration of booking.
pub struct EngineInner {
    source: Arc<dyn ColumnSource>,
    default_columns: Vec<String>,
    n_slots: usize,
    run_config: RunConfig,
    physical_names: HashSet<String>,

    filters: RwLock<Vec<Arc<FilterNode>>>,
    derived: RwLock<HashMap<String, Arc<DerivedColumnNode>>>,
    derived_order: RwLock<Vec<Arc<DerivedColumnNode>>>,
    actions: RwLock<Vec<Box<dyn Action>>>,
    ready_flags: RwLock<Vec<Arc<AtomicBool>>>,

    has_run: AtomicBool,
    run_lock: Mutex<()>,
}

impl EngineInner {
    /// Derived-column name uniqueness is engine-wide ("Derived-column names
    /// are unique within a graph"): a `Define` may not collide with a
    /// physical column or with any derived column booked anywhere in the
    /// graph, regardless of which branch booked it.
    fn check_name_available(&self, name: &str) -> Result<(), BookingError> {
        if self.physical_names.contains(name) || self.derived.read().contains_key(name) {
            Err(BookingError::DuplicateDerivedName(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn register_ready_flag(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.ready_flags.write().push(Arc::clone(&flag));
        flag
    }

    /// `run()`: allocate per-slot cursors, iterate rows partitioned
    /// across `nSlots` workers, then merge single-threaded.
    pub fn run(&self) -> Result<(), EngineError> {
        let _guard = self.run_lock.lock();
        self.has_run.store(true, Ordering::Release);
        tracing::debug!(rows = self.source.row_count(), n_slots = self.n_slots, "engine_run_started");

        let actions = self.actions.read();
        let derived = self.derived.read();

        let mut physical_needed: HashSet<String> = HashSet::new();
        for f in self.filters.read().iter() {
            physical_needed.extend(f.columns().iter().cloned());
        }
        for d in self.derived_order.read().iter() {
            physical_needed.extend(d.columns().iter().cloned());
        }
        for a in actions.iter() {
            physical_needed.extend(a.columns().iter().cloned());
        }
        physical_needed.retain(|name| !derived.contains_key(name));

        for action in actions.iter() {
            action.reset();
        }

        let n_slots = self.n_slots.max(1);
        let ranges = self.source.partition(n_slots);
        let timeout = self.run_config.timeout_controller();

        let mut cursor_maps: Vec<HashMap<String, Box<dyn ColumnCursor>>> = Vec::with_capacity(n_slots);
        for slot in 0..n_slots {
            let mut cursors: HashMap<String, Box<dyn ColumnCursor>> = HashMap::new();
            for name in &physical_needed {
                cursors.insert(name.clone(), self.source.open_cursor(slot, name)?);
            }
            cursor_maps.push(cursors);
        }

        cursor_maps
            .par_iter_mut()
            .zip(ranges.par_iter())
            .enumerate()
            .try_for_each(|(slot, (cursors, range))| -> Result<(), RunError> {
                let mut resolver = RowResolver::new(slot as SlotId, cursors, &derived);
                for (i, row) in range.iter().enumerate() {
                    if i % 4096 == 0 {
                        timeout.check().map_err(|e| RunError::Timeout {
                            elapsed: e.elapsed,
                            limit: e.timeout,
                        })?;
                    }
                    for action in actions.iter() {
                        action.visit_row(row, &mut resolver)?;
                    }
                }
                Ok(())
            })?;

        for action in actions.iter() {
            action.merge();
        }
        for flag in self.ready_flags.read().iter() {
            flag.store(true, Ordering::Release);
        }
        tracing::debug!("engine_run_completed");
        Ok(())
    }
}

/// Public handle to an [`EngineInner`]. Cheap to clone; every clone shares
/// the same booked graph and run state.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    pub fn new(source: Arc<dyn ColumnSource>, default_columns: Vec<String>, n_slots: usize) -> Self {
        Self::with_config(source, default_columns, n_slots, RunConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn ColumnSource>,
        default_columns: Vec<String>,
        n_slots: usize,
        run_config: RunConfig,
    ) -> Self {
        let physical_names = source.schema().iter().map(|c| c.name.clone()).collect();
        Engine(Arc::new(EngineInner {
            source,
            default_columns,
            n_slots: n_slots.max(1),
            run_config,
            physical_names,
            filters: RwLock::new(Vec::new()),
            derived: RwLock::new(HashMap::new()),
            derived_order: RwLock::new(Vec::new()),
            actions: RwLock::new(Vec::new()),
            ready_flags: RwLock::new(Vec::new()),
            has_run: AtomicBool::new(false),
            run_lock: Mutex::new(()),
        }))
    }

    /// Build an engine from a loaded [`crate::config::Config`]: resolves
    /// `nSlots` (0 = all cores) and translates `timeout_secs`/`limits` into
    /// a [`RunConfig`].
    pub fn from_config(source: Arc<dyn ColumnSource>, default_columns: Vec<String>, config: &crate::config::Config) -> Self {
        let n_slots = config.resolved_num_slots();
        let mut run_config = RunConfig::default().with_limits((&config.engine.limits).into());
        if config.engine.timeout_secs > 0 {
            run_config = run_config.with_timeout(std::time::Duration::from_secs(config.engine.timeout_secs));
        }
        Self::with_config(source, default_columns, n_slots, run_config)
    }

    /// A chain position rooted directly at the engine (no upstream filter,
    /// no derived columns visible yet).
    pub fn root(&self) -> Chain {
        Chain {
            engine: Arc::clone(&self.0),
            parent: None,
            derived_scope: None,
        }
    }

    pub fn run(&self) -> Result<(), EngineError> {
        self.0.run()
    }

    /// `Report()` called at the engine root: every named `Filter` booked
    /// anywhere in the graph, in booking order.
    pub fn report(&self) -> Result<String, EngineError> {
        self.root().report()
    }
}

/// Cons-list of derived columns visible at a chain position, threaded from
/// parent to child as `Chain::define` extends it. Lets a node see exactly
/// "parent's set ∪ its own if derived" rather than every `Define` booked
/// anywhere in the graph.
struct DerivedScope {
    node: Arc<DerivedColumnNode>,
    parent: Option<Arc<DerivedScope>>,
}

impl DerivedScope {
    fn contains(scope: &Arc<DerivedScope>, name: &str) -> bool {
        scope.node.name() == name || scope.parent.as_ref().is_some_and(|p| DerivedScope::contains(p, name))
    }

    fn get(scope: &Arc<DerivedScope>, name: &str) -> Option<Arc<DerivedColumnNode>> {
        if scope.node.name() == name {
            return Some(Arc::clone(&scope.node));
        }
        scope.parent.as_ref().and_then(|p| DerivedScope::get(p, name))
    }
}

/// A position in the computation graph reached by chaining `Filter`/
/// `Define` calls off an `Engine`. Each call returns a new `Chain`
/// (branching is supported by cloning a `Chain` before calling further
/// methods on it).
#[derive(Clone)]
pub struct Chain {
    engine: Arc<EngineInner>,
    parent: Option<Arc<FilterNode>>,
    derived_scope: Option<Arc<DerivedScope>>,
}

impl Chain {
    /// A derived column is visible at this position if it or a physical
    /// column exists and, for a derived name, flows in through this
    /// chain's own lineage (spec's node invariant: "parent's set ∪ its own
    /// if derived").
    fn check_column_exists(&self, name: &str) -> Result<(), BookingError> {
        if self.engine.physical_names.contains(name) {
            return Ok(());
        }
        if self.derived_scope.as_ref().is_some_and(|s| DerivedScope::contains(s, name)) {
            return Ok(());
        }
        Err(BookingError::UnknownColumn(name.to_string()))
    }

    /// Look up a visible derived column's node, for type-dispatch purposes.
    fn scope_get(&self, name: &str) -> Option<Arc<DerivedColumnNode>> {
        self.derived_scope.as_ref().and_then(|s| DerivedScope::get(s, name))
    }

    /// Column-name resolution policy: an explicit, fully populated
    /// list of length `k` is used as-is; an empty list is replaced by the
    /// engine's default columns truncated to `k`. Either way, every
    /// resolved name must be visible at this chain position.
    fn resolve_columns(&self, cols: Vec<String>, k: usize) -> Result<Vec<String>, BookingError> {
        if !cols.is_empty() {
            if cols.len() != k || cols.iter().any(String::is_empty) {
                return Err(BookingError::InsufficientDefaults {
                    needed: k,
                    available: cols.len(),
                });
            }
            for name in &cols {
                self.check_column_exists(name)?;
            }
            return Ok(cols);
        }
        if self.engine.default_columns.len() < k {
            return Err(BookingError::InsufficientDefaults {
                needed: k,
                available: self.engine.default_columns.len(),
            });
        }
        let resolved = self.engine.default_columns[..k].to_vec();
        for name in &resolved {
            self.check_column_exists(name)?;
        }
        Ok(resolved)
    }

    /// `Filter(pred, cols, name)`.
    pub fn filter(
        &self,
        name: Option<&str>,
        cols: Vec<String>,
        predicate: impl Fn(&[Value]) -> Result<bool, RunError> + Send + Sync + 'static,
    ) -> Result<Chain, EngineError> {
        let k = if cols.is_empty() { 1 } else { cols.len() };
        let resolved = self.resolve_columns(cols, k)?;
        let node = Arc::new(FilterNode::new(
            name.map(str::to_string),
            self.parent.clone(),
            resolved,
            Box::new(predicate),
            self.engine.n_slots,
        ));
        self.engine.filters.write().push(Arc::clone(&node));
        Ok(Chain {
            engine: Arc::clone(&self.engine),
            parent: Some(node),
            derived_scope: self.derived_scope.clone(),
        })
    }

    /// `Define(name, expr, cols)`: registers a derived column, unique
    /// across the whole graph, visible to this node's own downstream chain
    /// (but not to sibling branches that never flow through it).
    pub fn define(
        &self,
        name: &str,
        output_type: ValueType,
        cols: Vec<String>,
        expr: impl Fn(&[Value]) -> Result<Value, RunError> + Send + Sync + 'static,
    ) -> Result<Chain, EngineError> {
        self.engine.check_name_available(name)?;
        let k = if cols.is_empty() { 1 } else { cols.len() };
        let resolved = self.resolve_columns(cols, k)?;
        let node = Arc::new(DerivedColumnNode::new(
            name,
            output_type,
            resolved,
            Box::new(expr),
            self.engine.n_slots,
        ));
        self.engine.derived.write().insert(name.to_string(), Arc::clone(&node));
        self.engine.derived_order.write().push(Arc::clone(&node));
        Ok(Chain {
            engine: Arc::clone(&self.engine),
            parent: self.parent.clone(),
            derived_scope: Some(Arc::new(DerivedScope {
                node,
                parent: self.derived_scope.clone(),
            })),
        })
    }

    /// `Report()`: accept/reject stats for every named `Filter` between the
    /// root and this node, in booking order. Called at the root, this is
    /// every named `Filter` booked anywhere in the graph.
    pub fn report(&self) -> Result<String, EngineError> {
        if !self.engine.has_run.load(Ordering::Acquire) {
            return Err(LifecycleError::NotRun.into());
        }
        let Some(parent) = &self.parent else {
            return Ok(crate::report::render(&self.engine.filters.read()));
        };
        let mut lineage = Vec::new();
        let mut node = Some(Arc::clone(parent));
        while let Some(f) = node {
            node = f.parent().cloned();
            lineage.push(f);
        }
        lineage.reverse();
        Ok(crate::report::render(&lineage))
    }

    /// `Foreach(fn, cols)`: instant side effect, runs the engine inline.
    pub fn foreach(
        &self,
        cols: Vec<String>,
        callable: impl Fn(&[Value]) -> Result<(), RunError> + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        let k = if cols.is_empty() { 1 } else { cols.len() };
        let resolved = self.resolve_columns(cols, k)?;
        let action = ForeachAction {
            upstream: self.parent.clone(),
            columns: resolved,
            callable,
        };
        self.engine.actions.write().push(Box::new(action));
        self.engine.run()
    }

    /// `ForeachSlot(fn, cols)`: instant side effect, slot index included.
    pub fn foreach_slot(
        &self,
        cols: Vec<String>,
        callable: impl Fn(SlotId, &[Value]) -> Result<(), RunError> + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        let k = if cols.is_empty() { 1 } else { cols.len() };
        let resolved = self.resolve_columns(cols, k)?;
        let action = ForeachSlotAction {
            upstream: self.parent.clone(),
            columns: resolved,
            callable,
        };
        self.engine.actions.write().push(Box::new(action));
        self.engine.run()
    }

    /// `Count()`.
    pub fn count(&self) -> ResultHandle<u64> {
        let result = Arc::new(Mutex::new(0u64));
        let action = CountAction::new(self.parent.clone(), self.engine.n_slots, Arc::clone(&result));
        self.engine.actions.write().push(Box::new(action));
        let ready = self.engine.register_ready_flag();
        ResultHandle::new(Arc::downgrade(&self.engine), result, ready)
    }

    /// `Reduce(f, col, init)`.
    pub fn reduce<T>(
        &self,
        cols: Vec<String>,
        init: T,
        f: impl Fn(T, T) -> T + Send + Sync + 'static,
        extract: impl Fn(&Value) -> Result<T, RunError> + Send + Sync + 'static,
    ) -> Result<ResultHandle<T>, EngineError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let resolved = self.resolve_columns(cols, 1)?;
        let result = Arc::new(Mutex::new(init.clone()));
        let action = ReduceAction::new(
            self.parent.clone(),
            resolved,
            init,
            f,
            Box::new(extract),
            self.engine.n_slots,
            Arc::clone(&result),
        );
        self.engine.actions.write().push(Box::new(action));
        let ready = self.engine.register_ready_flag();
        Ok(ResultHandle::new(Arc::downgrade(&self.engine), result, ready))
    }

    /// `Reduce(f, col)` with no init value: the type must be
    /// default-constructible, and `T::default()` seeds every per-slot
    /// partial (and the merge fold).
    pub fn reduce_default<T>(
        &self,
        cols: Vec<String>,
        f: impl Fn(T, T) -> T + Send + Sync + 'static,
        extract: impl Fn(&Value) -> Result<T, RunError> + Send + Sync + 'static,
    ) -> Result<ResultHandle<T>, EngineError>
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        self.reduce(cols, T::default(), f, extract)
    }

    /// `Take<T>(col)`.
    pub fn take<T>(
        &self,
        cols: Vec<String>,
        explicit: Option<ValueType>,
        extract: impl Fn(&Value) -> Result<T, RunError> + Send + Sync + 'static,
    ) -> Result<ResultHandle<Vec<T>>, EngineError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let resolved = self.resolve_columns(cols, 1)?;
        resolve_column_type(
            &resolved[0],
            explicit,
            self.engine.source.as_ref(),
            self.scope_get(&resolved[0]).as_deref(),
        )?;
        let result = Arc::new(Mutex::new(Vec::new()));
        let memory = MemoryTracker::new(self.engine.run_config.limits.max_memory_bytes);
        let action = TakeAction::new(
            self.parent.clone(),
            resolved,
            Box::new(extract),
            self.engine.n_slots,
            Arc::clone(&result),
            self.engine.run_config.limits.clone(),
            memory,
        );
        self.engine.actions.write().push(Box::new(action));
        let ready = self.engine.register_ready_flag();
        Ok(ResultHandle::new(Arc::downgrade(&self.engine), result, ready))
    }

    fn min_max(&self, kind: MinMaxKind, cols: Vec<String>, explicit: Option<ValueType>) -> Result<ResultHandle<f64>, EngineError> {
        let resolved = self.resolve_columns(cols, 1)?;
        resolve_column_type(
            &resolved[0],
            explicit,
            self.engine.source.as_ref(),
            self.scope_get(&resolved[0]).as_deref(),
        )?;
        let result = Arc::new(Mutex::new(0.0));
        let action = MinMaxAction::new(kind, self.parent.clone(), resolved, self.engine.n_slots, Arc::clone(&result));
        self.engine.actions.write().push(Box::new(action));
        let ready = self.engine.register_ready_flag();
        Ok(ResultHandle::new(Arc::downgrade(&self.engine), result, ready))
    }

    /// `Min(col)`.
    pub fn min(&self, cols: Vec<String>, explicit: Option<ValueType>) -> Result<ResultHandle<f64>, EngineError> {
        self.min_max(MinMaxKind::Min, cols, explicit)
    }

    /// `Max(col)`.
    pub fn max(&self, cols: Vec<String>, explicit: Option<ValueType>) -> Result<ResultHandle<f64>, EngineError> {
        self.min_max(MinMaxKind::Max, cols, explicit)
    }

    /// `Mean(col)`.
    pub fn mean(&self, cols: Vec<String>, explicit: Option<ValueType>) -> Result<ResultHandle<f64>, EngineError> {
        let resolved = self.resolve_columns(cols, 1)?;
        resolve_column_type(
            &resolved[0],
            explicit,
            self.engine.source.as_ref(),
            self.scope_get(&resolved[0]).as_deref(),
        )?;
        let result = Arc::new(Mutex::new(0.0));
        let action = MeanAction::new(self.parent.clone(), resolved, self.engine.n_slots, Arc::clone(&result));
        self.engine.actions.write().push(Box::new(action));
        let ready = self.engine.register_ready_flag();
        Ok(ResultHandle::new(Arc::downgrade(&self.engine), result, ready))
    }

    fn histo(
        &self,
        arity: u8,
        cols: Vec<String>,
        weight_col: Option<String>,
        model: Box<dyn Histogram>,
        explicit: Option<ValueType>,
    ) -> Result<ResultHandle<Arc<dyn Histogram>>, EngineError> {
        if arity > 1 && !model.has_axis_limits() {
            return Err(BookingError::HistogramNeedsAxisLimits(arity).into());
        }
        let mut resolved = self.resolve_columns(cols, arity as usize)?;
        resolve_column_type(
            &resolved[0],
            explicit,
            self.engine.source.as_ref(),
            self.scope_get(&resolved[0]).as_deref(),
        )?;
        let weighted = weight_col.is_some();
        if let Some(w) = weight_col {
            self.check_column_exists(&w)?;
            resolved.push(w);
        }
        let result: Arc<Mutex<Arc<dyn Histogram>>> = Arc::new(Mutex::new(Arc::from(model.clone_empty())));
        let memory = MemoryTracker::new(self.engine.run_config.limits.max_memory_bytes);
        let action = HistoAction::new(
            self.parent.clone(),
            resolved,
            arity,
            weighted,
            model,
            self.engine.n_slots,
            Arc::clone(&result),
            self.engine.run_config.limits.clone(),
            memory,
        );
        self.engine.actions.write().push(Box::new(action));
        let ready = self.engine.register_ready_flag();
        Ok(ResultHandle::new(Arc::downgrade(&self.engine), result, ready))
    }

    /// `Histo1D(model, col[, wcol])`.
    pub fn histo1d(
        &self,
        model: crate::histogram::Histogram1D,
        col: Vec<String>,
        weight_col: Option<String>,
        explicit: Option<ValueType>,
    ) -> Result<ResultHandle<Arc<dyn Histogram>>, EngineError> {
        self.histo(1, col, weight_col, Box::new(model), explicit)
    }

    /// `Histo2D(model, cols, [wcol])`.
    pub fn histo2d(
        &self,
        model: crate::histogram::Histogram2D,
        cols: Vec<String>,
        weight_col: Option<String>,
        explicit: Option<ValueType>,
    ) -> Result<ResultHandle<Arc<dyn Histogram>>, EngineError> {
        self.histo(2, cols, weight_col, Box::new(model), explicit)
    }

    /// `Histo3D(model, cols, [wcol])`.
    pub fn histo3d(
        &self,
        model: crate::histogram::Histogram3D,
        cols: Vec<String>,
        weight_col: Option<String>,
        explicit: Option<ValueType>,
    ) -> Result<ResultHandle<Arc<dyn Histogram>>, EngineError> {
        self.histo(3, cols, weight_col, Box::new(model), explicit)
    }
}
