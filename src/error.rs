//! Engine Error Taxonomy
//!
//! All failures the engine can produce reach the caller through one
//! recoverable channel: [`BookingError`] for failures at chain-building
//! time, [`RunError`] for failures surfaced out of `run()` (and thus out of
//! the first result-handle dereference), and [`LifecycleError`] for
//! handle/report misuse. [`EngineError`] aggregates all three so public
//! APIs can return a single error type.

use thiserror::Error;

/// Errors raised while booking nodes onto the graph (`Filter`, `Define`,
/// `Foreach`, actions, `Report`). Always surfaced at chain-building time,
/// never during `run()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// A declared input column name does not resolve to a physical column
    /// or a derived column visible at this node.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// A `Define` name collides with a physical column name or a
    /// previously derived name visible at this node.
    #[error("duplicate derived column name: {0}")]
    DuplicateDerivedName(String),

    /// The node's callable arity exceeds the length of the default column
    /// list when no explicit column list was given.
    #[error("default column list has {available} entries, need {needed}")]
    InsufficientDefaults { needed: usize, available: usize },

    /// The type dispatcher could not map the column to one of its closed
    /// set of inferable types.
    #[error("cannot infer element type for column: {0}")]
    CannotInferType(String),

    /// A `Reduce` was booked with no init value over a type that isn't
    /// default-constructible.
    #[error("reduce over column '{0}' needs an init value: type is not default-constructible")]
    BadReduceSignature(String),

    /// A `Histo2D`/`Histo3D` was booked with axis limits unset (deferred
    /// limits are only supported for `Histo1D`).
    #[error("{0}D histogram requires explicit axis limits")]
    HistogramNeedsAxisLimits(u8),
}

/// Errors surfaced out of `Engine::run`, and therefore out of the first
/// dereference of any result handle bound to that run.
#[derive(Error, Debug)]
pub enum RunError {
    /// A user callable (predicate, expression, action body) panicked or
    /// returned an error during the row pass.
    #[error("user callable failed: {0}")]
    UserCallableThrew(String),

    /// An array-valued physical column's underlying layout was not
    /// contiguous, so no bounded slice view could be produced.
    #[error("array column '{0}' has a non-contiguous layout")]
    NonContiguousArray(String),

    /// The input provider could not be opened or iterated.
    #[error("input source unavailable: {0}")]
    SourceUnavailable(String),

    /// The cooperative run timeout elapsed before the pass completed.
    #[error("run exceeded timeout after {elapsed:?} (limit {limit:?})")]
    Timeout {
        elapsed: std::time::Duration,
        limit: std::time::Duration,
    },

    /// A resource limit (histogram buffer size, `Take` collection size) was
    /// exceeded during the pass.
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(#[from] crate::execution::ResourceError),
}

/// Errors about the lifecycle of result handles and reporting, independent
/// of any particular run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The engine a result handle referenced has been dropped.
    #[error("engine backing this result handle no longer exists")]
    EngineGone,

    /// `report()` was called before `run()` ever executed.
    #[error("cannot report: engine has not run yet")]
    NotRun,
}

/// The single error type returned by the engine's public, fallible
/// operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type EngineResult<T> = Result<T, EngineError>;
