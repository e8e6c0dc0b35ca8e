//! Resource Limits Module
//!
//! Bounds the two places a single-pass run can grow unboundedly in memory:
//! - `Take` collections, which accumulate one element per accepted row.
//! - Deferred-limits histograms, which buffer every fill value per slot
//!   until axis extrema are known at merge time.
//!
//! Uses cooperative checking: the relevant action checks the limit after
//! each append rather than the engine enforcing it centrally, since only
//! the action knows what "one unit" of its partial means.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Resource limit error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    /// A per-slot buffer (deferred-limits histogram, `Take` partial) grew
    /// past its configured cap.
    #[error("buffer limit exceeded in '{stage}': {actual} elements, limit {limit} elements")]
    BufferLimitExceeded {
        stage: String,
        limit: usize,
        actual: usize,
    },

    /// Estimated memory usage across all per-slot buffers exceeded the
    /// configured cap.
    #[error("memory limit exceeded: used {used} bytes, limit {limit} bytes")]
    MemoryLimitExceeded { limit: usize, used: usize },
}

/// Resource limits configuration for one engine run.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum total estimated memory usage in bytes across all per-slot
    /// buffers (`None` = unlimited).
    pub max_memory_bytes: Option<usize>,

    /// Maximum number of elements any single `Take` or deferred-limits
    /// histogram per-slot buffer may accumulate (`None` = unlimited).
    pub max_buffer_elements: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_memory_bytes: None,
            max_buffer_elements: None,
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_buffer_elements(mut self, n: usize) -> Self {
        self.max_buffer_elements = Some(n);
        self
    }

    pub fn with_max_memory_bytes(mut self, n: usize) -> Self {
        self.max_memory_bytes = Some(n);
        self
    }

    /// Check a per-slot buffer's current length against the configured cap.
    pub fn check_buffer(&self, stage: &str, actual: usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.max_buffer_elements {
            if actual > limit {
                return Err(ResourceError::BufferLimitExceeded {
                    stage: stage.to_string(),
                    limit,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Tracks estimated memory usage across all per-slot buffers during a run,
/// shared via `Arc` so every slot updates the same counter without a lock.
#[derive(Debug)]
pub struct MemoryTracker {
    used_bytes: AtomicUsize,
    limit_bytes: Option<usize>,
}

impl MemoryTracker {
    pub fn new(limit_bytes: Option<usize>) -> Arc<Self> {
        Arc::new(MemoryTracker {
            used_bytes: AtomicUsize::new(0),
            limit_bytes,
        })
    }

    /// Record an allocation and check it against the limit. Called by
    /// deferred-limits histogram buffers and `Take` partials as they grow.
    pub fn record(&self, additional_bytes: usize) -> Result<(), ResourceError> {
        let used = self.used_bytes.fetch_add(additional_bytes, Ordering::Relaxed) + additional_bytes;
        if let Some(limit) = self.limit_bytes {
            if used > limit {
                return Err(ResourceError::MemoryLimitExceeded { limit, used });
            }
        }
        Ok(())
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Zero the tracked usage. Called before every row pass, alongside the
    /// buffers it tracks, so re-running an engine doesn't compound a stale
    /// count onto the new pass.
    pub fn reset(&self) {
        self.used_bytes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_rejects() {
        let limits = ResourceLimits::unlimited();
        assert!(limits.check_buffer("take", 1_000_000).is_ok());
    }

    #[test]
    fn buffer_limit_rejects_past_cap() {
        let limits = ResourceLimits::default().with_max_buffer_elements(10);
        assert!(limits.check_buffer("take", 10).is_ok());
        assert!(limits.check_buffer("take", 11).is_err());
    }

    #[test]
    fn memory_tracker_accumulates_across_calls() {
        let tracker = MemoryTracker::new(Some(100));
        assert!(tracker.record(40).is_ok());
        assert!(tracker.record(40).is_ok());
        assert_eq!(tracker.used_bytes(), 80);
        assert!(tracker.record(40).is_err());
    }

    #[test]
    fn memory_tracker_reset_allows_reuse_across_runs() {
        let tracker = MemoryTracker::new(Some(100));
        assert!(tracker.record(90).is_ok());
        tracker.reset();
        assert_eq!(tracker.used_bytes(), 0);
        assert!(tracker.record(90).is_ok());
    }
}
