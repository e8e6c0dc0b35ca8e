//! Lazy result handle: a value bound to an Action that triggers the
//! engine's one-shot execution on first use.
//!
//! The handle references its engine weakly; the engine owns the aggregate
//! shared with the handle. This breaks the ownership cycle an engine ↔
//! handle strong-reference pair would otherwise form, without exposing a
//! raw back-pointer.

use crate::engine::EngineInner;
use crate::error::{EngineError, LifecycleError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A lazy wrapper over a shared aggregate value produced by one booked
/// Action. Dereferencing (via [`ResultHandle::get`]) triggers
/// `Engine::run` if the engine has not produced a ready value yet.
pub struct ResultHandle<T> {
    engine: Weak<EngineInner>,
    aggregate: Arc<Mutex<T>>,
    ready: Arc<AtomicBool>,
}

impl<T: Clone> ResultHandle<T> {
    pub(crate) fn new(engine: Weak<EngineInner>, aggregate: Arc<Mutex<T>>, ready: Arc<AtomicBool>) -> Self {
        ResultHandle { engine, aggregate, ready }
    }

    /// Return the aggregate, running the engine first if it is not ready
    /// yet. Fails with `EngineGone` if the engine has been dropped.
    pub fn get(&self) -> Result<T, EngineError> {
        if !self.ready.load(Ordering::Acquire) {
            let engine = self.engine.upgrade().ok_or(LifecycleError::EngineGone)?;
            engine.run()?;
        }
        Ok(self.aggregate.lock().clone())
    }

    /// Whether the engine has already produced a value for this handle,
    /// without triggering a run.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_flagged() {
        let aggregate = Arc::new(Mutex::new(0u64));
        let ready = Arc::new(AtomicBool::new(false));
        let handle: ResultHandle<u64> = ResultHandle::new(Weak::new(), aggregate, ready);
        assert!(!handle.is_ready());
        assert!(matches!(handle.get(), Err(EngineError::Lifecycle(LifecycleError::EngineGone))));
    }

    #[test]
    fn reads_aggregate_once_ready_without_running() {
        let aggregate = Arc::new(Mutex::new(42u64));
        let ready = Arc::new(AtomicBool::new(true));
        let handle: ResultHandle<u64> = ResultHandle::new(Weak::new(), aggregate, ready);
        assert_eq!(handle.get().unwrap(), 42);
    }
}
