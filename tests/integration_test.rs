//! End-to-end scenarios covering chain booking, deferral of all I/O until
//! the first result-handle dereference, and the single-pass outcome.

use arrow::array::{Float64Array, Int32Array};
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::record_batch::RecordBatch;
use crateflow::histogram::{Histogram, Histogram1D};
use crateflow::source::arrow_source::ArrowColumnSource;
use crateflow::value::{Value, ValueType};
use crateflow::{Engine, LifecycleError};
use std::sync::{Arc, Once};

static TRACING_INIT: Once = Once::new();

/// Turn on `tracing-subscriber`'s fmt layer once for the test binary, so the
/// `tracing::debug!`/`tracing::info!` calls the engine and report module
/// make during these scenarios are actually observable under `--nocapture`.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("crateflow=debug").try_init();
    });
}

fn int_column(name: &str, values: Vec<i32>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new(name, ArrowType::Int32, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
}

fn float_column(name: &str, values: Vec<f64>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new(name, ArrowType::Float64, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(values))]).unwrap()
}

fn engine_over_ints(column: &str, values: Vec<i32>, n_slots: usize) -> Engine {
    let batch = int_column(column, values);
    let source = Arc::new(ArrowColumnSource::from_record_batch(&batch).unwrap());
    Engine::new(source, vec![column.to_string()], n_slots)
}

fn engine_over_floats(column: &str, values: Vec<f64>, n_slots: usize) -> Engine {
    let batch = float_column(column, values);
    let source = Arc::new(ArrowColumnSource::from_record_batch(&batch).unwrap());
    Engine::new(source, vec![column.to_string()], n_slots)
}

/// S1 — `Filter(x>2).Count()` over `[1,2,3,4,5]` yields 3.
#[test]
fn scenario_count_with_filter() {
    let engine = engine_over_ints("x", vec![1, 2, 3, 4, 5], 1);
    let root = engine.root();
    let gt2 = root
        .filter(None, vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if *n > 2)))
        .unwrap();
    let count = gt2.count();
    assert_eq!(count.get().unwrap(), 3);
}

/// S2 — `Mean()` over the default column `[1.0, 2.0, 3.0, 4.0]` yields 2.5.
#[test]
fn scenario_mean_with_default_column() {
    let engine = engine_over_floats("v", vec![1.0, 2.0, 3.0, 4.0], 1);
    let root = engine.root();
    let mean = root.mean(vec![], Some(ValueType::Float64)).unwrap();
    assert_eq!(mean.get().unwrap(), 2.5);
}

/// S3 — `Define("y", 2*x).Histo1D({bins=4,min=0,max=8}, "y")` over
/// `x: [0,1,2,3]` yields one count per bin.
#[test]
fn scenario_derived_column_feeds_histogram() {
    let engine = engine_over_ints("x", vec![0, 1, 2, 3], 1);
    let root = engine.root();
    let derived = root
        .define("y", ValueType::Int32, vec!["x".into()], |v| match &v[0] {
            Value::Int32(n) => Ok(Value::Int32(n * 2)),
            _ => unreachable!(),
        })
        .unwrap();
    let histo = derived
        .histo1d(Histogram1D::new(4, 0.0, 8.0), vec!["y".into()], None, Some(ValueType::Int32))
        .unwrap();
    let result = histo.get().unwrap();
    let h1d = result.as_any().downcast_ref::<Histogram1D>().unwrap();
    assert_eq!(h1d.counts(), &[1.0, 1.0, 1.0, 1.0]);
}

/// S4 — `Reduce((a,b)=>a+b, "v", 0.0)` over `[1.5,2.5,4.0]` yields 8.0,
/// independent of `nSlots` (parallel determinism, invariant 4).
#[test]
fn scenario_reduce_is_order_independent_across_slot_counts() {
    for n_slots in [1, 2, 3] {
        let engine = engine_over_floats("v", vec![1.5, 2.5, 4.0], n_slots);
        let root = engine.root();
        let sum = root
            .reduce(
                vec!["v".into()],
                0.0f64,
                |a, b| a + b,
                |v| match v {
                    Value::Float64(n) => Ok(*n),
                    _ => unreachable!(),
                },
            )
            .unwrap();
        assert_eq!(sum.get().unwrap(), 8.0, "mismatched with nSlots={n_slots}");
    }
}

/// S5 — two named, chained filters report independent accept/reject
/// counts in booking order. `even` sees every row; `big` (chained off
/// `even`) only sees rows `even` already accepted.
#[test]
fn scenario_named_filters_report_in_booking_order() {
    let engine = engine_over_ints("x", (1..=10).collect(), 1);
    let root = engine.root();
    let even = root
        .filter(Some("even"), vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if n % 2 == 0)))
        .unwrap();
    let big = even
        .filter(Some("big"), vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if *n > 5)))
        .unwrap();
    let count = big.count();
    count.get().unwrap();

    let report = engine.report().unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "even: accepted=5 rejected=5");
    assert_eq!(lines[1], "big: accepted=3 rejected=2");
}

/// S6 — `Take("x")` over `[3,1,4,1,5,9,2,6]` with `nSlots=2` concatenates
/// in slot-id order, and within a slot in ascending row order, which for a
/// contiguous partition reproduces the original sequence.
#[test]
fn scenario_take_concatenates_in_slot_order() {
    let engine = engine_over_ints("x", vec![3, 1, 4, 1, 5, 9, 2, 6], 2);
    let root = engine.root();
    let taken = root
        .take(vec!["x".into()], Some(ValueType::Int32), |v| match v {
            Value::Int32(n) => Ok(*n),
            _ => unreachable!(),
        })
        .unwrap();
    assert_eq!(taken.get().unwrap(), vec![3, 1, 4, 1, 5, 9, 2, 6]);
}

/// Invariant 2 — accepted + rejected == rows seen by the filter.
#[test]
fn invariant_filter_counts_are_conserved() {
    let engine = engine_over_ints("x", (1..=20).collect(), 4);
    let root = engine.root();
    let odd = root
        .filter(Some("odd"), vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if n % 2 != 0)))
        .unwrap();
    odd.count().get().unwrap();
    let report = engine.report().unwrap();
    assert!(report.contains("odd: accepted=10 rejected=10"));
}

/// Invariant 3 — a result handle's ready flag flips exactly once per run,
/// and re-dereferencing does not trigger another pass.
#[test]
fn invariant_ready_flag_is_idempotent_after_first_run() {
    let engine = engine_over_ints("x", vec![1, 2, 3], 1);
    let count = engine.root().count();
    assert!(!count.is_ready());
    assert_eq!(count.get().unwrap(), 3);
    assert!(count.is_ready());
    assert_eq!(count.get().unwrap(), 3);
}

/// Invariant 6 — lazy discipline: reporting before any result handle is
/// dereferenced fails with `NotRun`, proving no pass has happened yet.
#[test]
fn invariant_lazy_discipline_defers_run_until_first_get() {
    let engine = engine_over_ints("x", vec![1, 2, 3], 1);
    let root = engine.root();
    let _count = root.count();
    let err = engine.report().unwrap_err();
    assert!(matches!(
        err,
        crateflow::EngineError::Lifecycle(LifecycleError::NotRun)
    ));
}

/// Invariant 7 — short-circuit: a rejecting upstream filter means the
/// downstream filter's predicate never runs on that row.
#[test]
fn invariant_short_circuit_skips_downstream_predicate() {
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let engine = engine_over_ints("x", vec![1, 9], 1);
    let root = engine.root();
    let gt5 = root
        .filter(Some("gt5"), vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if *n > 5)))
        .unwrap();
    let counter = Arc::clone(&calls);
    let always_true = gt5
        .filter(None, vec!["x".into()], move |_v| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(true)
        })
        .unwrap();
    always_true.count().get().unwrap();
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// A result handle outliving its engine fails with `EngineGone` rather than
/// panicking or hanging.
#[test]
fn result_handle_reports_engine_gone() {
    let engine = engine_over_ints("x", vec![1, 2, 3], 1);
    let count = engine.root().count();
    drop(engine);
    let err = count.get().unwrap_err();
    assert!(matches!(
        err,
        crateflow::EngineError::Lifecycle(LifecycleError::EngineGone)
    ));
}

/// Booking errors surface at chain-building time, never at run time.
#[test]
fn booking_rejects_unknown_column_before_run() {
    let engine = engine_over_ints("x", vec![1, 2, 3], 1);
    let root = engine.root();
    let err = root.filter(None, vec!["missing".into()], |_| Ok(true)).unwrap_err();
    assert!(matches!(
        err,
        crateflow::EngineError::Booking(crateflow::BookingError::UnknownColumn(_))
    ));
}

/// A `Define` whose name collides with an existing column is rejected
/// uniformly, regardless of whether the name appears in the
/// default-column list.
#[test]
fn booking_rejects_derived_name_colliding_with_physical_column() {
    let engine = engine_over_ints("x", vec![1, 2, 3], 1);
    let root = engine.root();
    let err = root
        .define("x", ValueType::Int32, vec!["x".into()], |v| Ok(v[0].clone()))
        .unwrap_err();
    assert!(matches!(
        err,
        crateflow::EngineError::Booking(crateflow::BookingError::DuplicateDerivedName(_))
    ));
}

/// `Reduce(f, col)` with no init value seeds from `T::default()`.
#[test]
fn scenario_reduce_default_seeds_from_type_default() {
    let engine = engine_over_ints("x", vec![1, 2, 3, 4], 1);
    let root = engine.root();
    let sum = root
        .reduce_default(vec!["x".into()], |a: i64, b| a + b, |v| match v {
            Value::Int32(n) => Ok(i64::from(*n)),
            _ => unreachable!(),
        })
        .unwrap();
    assert_eq!(sum.get().unwrap(), 10);
}

/// A `Define` booked on one branch is not visible to a sibling branch that
/// never flows through it — the node invariant "parent's set ∪ its own if
/// derived" is scoped per chain position, not engine-wide.
#[test]
fn booking_rejects_derived_column_from_a_sibling_branch() {
    let engine = engine_over_ints("x", vec![1, 2, 3], 1);
    let root = engine.root();
    let branch_a = root
        .define("doubled", ValueType::Int32, vec!["x".into()], |v| match &v[0] {
            Value::Int32(n) => Ok(Value::Int32(n * 2)),
            _ => unreachable!(),
        })
        .unwrap();
    let branch_b = root.filter(None, vec!["x".into()], |_| Ok(true)).unwrap();

    // Visible on the branch that defined it.
    assert!(branch_a
        .filter(None, vec!["doubled".into()], |_| Ok(true))
        .is_ok());

    // Not visible on an unrelated sibling branch.
    let err = branch_b.filter(None, vec!["doubled".into()], |_| Ok(true)).unwrap_err();
    assert!(matches!(
        err,
        crateflow::EngineError::Booking(crateflow::BookingError::UnknownColumn(_))
    ));
}

/// `Chain::report()` scopes its output to the named Filters between the
/// root and the calling node; a root call still reports every named Filter
/// in the graph, matching `Engine::report()`.
#[test]
fn scenario_chain_report_is_scoped_to_its_own_lineage() {
    let engine = engine_over_ints("x", (1..=10).collect(), 1);
    let root = engine.root();
    let even = root
        .filter(Some("even"), vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if n % 2 == 0)))
        .unwrap();
    let unrelated = root
        .filter(Some("unrelated"), vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if *n > 100)))
        .unwrap();
    let big = even
        .filter(Some("big"), vec!["x".into()], |v| Ok(matches!(&v[0], Value::Int32(n) if *n > 5)))
        .unwrap();

    big.count().get().unwrap();
    unrelated.count().get().unwrap();

    let scoped = big.report().unwrap();
    assert_eq!(scoped.lines().count(), 2);
    assert!(scoped.contains("even: accepted=5 rejected=5"));
    assert!(scoped.contains("big: accepted=3 rejected=2"));
    assert!(!scoped.contains("unrelated"));

    let full = engine.report().unwrap();
    assert_eq!(full.lines().count(), 3);
    assert!(full.contains("unrelated"));
}

/// Loads a `RecordBatch` round-tripped through an on-disk Parquet file
/// (written to a `tempfile` fixture) rather than only ever exercising the
/// in-memory `from_record_batch` path.
#[test]
fn scenario_source_reads_back_a_parquet_file_round_trip() {
    init_tracing();
    let batch = int_column("x", vec![10, 20, 30, 40, 50]);

    let file = tempfile::NamedTempFile::new().unwrap();
    {
        let mut writer = parquet::arrow::ArrowWriter::try_new(file.reopen().unwrap(), batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    let source = Arc::new(ArrowColumnSource::from_parquet_file(file.path()).unwrap());
    let engine = Engine::new(source, vec!["x".into()], 1);
    let root = engine.root();
    let sum = root
        .reduce_default(vec!["x".into()], |a: i64, b| a + b, |v| match v {
            Value::Int32(n) => Ok(i64::from(*n)),
            _ => unreachable!(),
        })
        .unwrap();
    assert_eq!(sum.get().unwrap(), 150);
}
