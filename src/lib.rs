//! # crateflow
//!
//! A lazily evaluated, single-pass analysis engine for columnar event data.
//!
//! A program is a graph of `Filter`, `Define` (derived column), and
//! terminal Action nodes built off an [`Engine`] via its [`Chain`]
//! builder. Nothing runs until a [`ResultHandle`] is first dereferenced:
//! at that point the engine partitions the input's rows across `nSlots`
//! parallel workers, visits every booked Action once per accepted row, and
//! merges the per-slot partials single-threaded. A column is read once per
//! row regardless of how many Filters or Actions need it; a Filter's
//! result is memoized per (slot, row) across the nodes that share it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crateflow::{Engine, Value};
//! use crateflow::source::arrow_source::ArrowColumnSource;
//! use std::sync::Arc;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(ArrowColumnSource::from_parquet_file(std::path::Path::new("events.parquet"))?);
//! let engine = Engine::new(source, vec!["energy".into()], 4);
//!
//! let root = engine.root();
//! let high_energy = root.filter(Some("high-energy"), vec!["energy".into()], |v| {
//!     Ok(matches!(&v[0], Value::Float64(e) if *e > 100.0))
//! })?;
//!
//! let count = high_energy.count();
//! println!("accepted rows: {}", count.get()?);
//! println!("{}", engine.report()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - [`value`]: the closed runtime value representation and Arrow glue.
//! - [`source`]: the input provider contract (`ColumnSource`/`ColumnCursor`)
//!   and the Arrow/Parquet reference implementation.
//! - [`graph`]: `Filter`, `Define` (`DerivedColumnNode`), and the `Action`
//!   taxonomy (`Count`, `Reduce`, `Take`, `Min`/`Max`/`Mean`, histograms).
//! - [`slot`]: per-worker memoization primitives (`FilterSlot`,
//!   `DerivedSlot`).
//! - [`histogram`]: the histogram aggregate contract and reference 1D/2D/3D
//!   implementations.
//! - [`dispatch`]: booking-time element-type inference.
//! - [`engine`]: `Engine`/`Chain`, the booking surface and the row pass.
//! - [`result`]: the lazy `ResultHandle<T>`.
//! - [`error`]: the engine's error taxonomy.
//! - [`config`]: hierarchical runtime configuration (`figment`-backed).
//! - [`execution`]: run timeout and resource-limit hardening.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod histogram;
pub mod report;
pub mod result;
pub mod slot;
pub mod source;
pub mod value;

pub use config::Config;
pub use engine::{Chain, Engine};
pub use error::{BookingError, EngineError, EngineResult, LifecycleError, RunError};
pub use histogram::{Histogram, Histogram1D, Histogram2D, Histogram3D, HistogramResult};
pub use result::ResultHandle;
pub use value::{Value, ValueType};
