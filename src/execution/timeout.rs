//! Run Timeout Module
//!
//! Cooperative timeout enforcement for `Engine::run`. The core has no
//! suspension or cancellation of its own; this is the one hook a caller
//! can use to bound a row pass, checked between row-range chunks rather
//! than inside the hot per-row loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timeout error.
#[derive(Debug, Clone)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded.
    pub timeout: Duration,
    /// How long the run actually ran.
    pub elapsed: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run exceeded timeout of {:?} (ran for {:?})",
            self.timeout, self.elapsed
        )
    }
}

impl std::error::Error for TimeoutError {}

/// Cooperative timeout controller for one `run()`.
///
/// Shared across the rayon workers processing row ranges; any worker that
/// observes an expired timeout flips the flag so every other worker's next
/// `check()` also fails.
#[derive(Clone)]
pub struct RunTimeout {
    cancelled: Arc<AtomicBool>,
    start_time: Instant,
    timeout_duration: Option<Duration>,
}

impl RunTimeout {
    /// Create a new timeout controller with the specified duration.
    pub fn new(timeout: Option<Duration>) -> Self {
        RunTimeout {
            cancelled: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
            timeout_duration: timeout,
        }
    }

    /// Create a timeout controller with no timeout (infinite).
    pub fn infinite() -> Self {
        RunTimeout::new(None)
    }

    /// Check if the run has been cancelled or timed out.
    ///
    /// Called between row-range chunks. Returns `Ok(())` if the run can
    /// continue, or `Err(TimeoutError)` if it should stop.
    pub fn check(&self) -> Result<(), TimeoutError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(TimeoutError {
                timeout: self.timeout_duration.unwrap_or(Duration::ZERO),
                elapsed: self.start_time.elapsed(),
            });
        }

        if let Some(timeout) = self.timeout_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > timeout {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(TimeoutError { timeout, elapsed });
            }
        }

        Ok(())
    }

    /// Cancel the run explicitly.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.timeout_duration.map(|timeout| {
            let elapsed = self.start_time.elapsed();
            if elapsed >= timeout {
                Duration::ZERO
            } else {
                timeout - elapsed
            }
        })
    }

    /// Reset the start time, for reusing the controller across re-runs.
    pub fn reset(&mut self) {
        self.start_time = Instant::now();
        self.cancelled.store(false, Ordering::Relaxed);
    }

    /// A handle that can be used to cancel from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl Default for RunTimeout {
    fn default() -> Self {
        // No timeout by default: the core never imposes one on its own.
        RunTimeout::infinite()
    }
}

/// Handle for cancelling a run from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
