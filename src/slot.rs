//! Per-slot scratch state.
//!
//! Every mutable piece of per-node state that the row pass touches is
//! indexed by a dense `slot` integer so that no two workers ever write the
//! same memory. `SlotId` is the sharding primitive the rest of the
//! crate builds on; nothing here is `Sync` on purpose — each slot's state is
//! owned by exactly one worker for the duration of a run.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// A dense worker index in `[0, nSlots)`.
pub type SlotId = usize;

/// Tri-state memo for a `Filter`'s last-evaluated result at one slot.
///
/// Encoded as a small integer rather than `bool` so memoization can be
/// represented with a plain atomic without a sentinel row index: the state
/// and the "have we evaluated row r yet" question are tracked separately by
/// the slot's last-seen row counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TriState {
    Unevaluated = 0,
    False = 1,
    True = 2,
}

impl TriState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TriState::False,
            2 => TriState::True,
            _ => TriState::Unevaluated,
        }
    }
}

/// Per-slot Filter memo: last-examined row and its tri-state result, plus
/// accepted/rejected counters.
#[derive(Debug, Default)]
pub struct FilterSlot {
    last_row: AtomicU64,
    last_result: AtomicU8,
    has_last: std::sync::atomic::AtomicBool,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// Sentinel meaning "no row has been evaluated on this slot yet."
const NO_ROW: u64 = u64::MAX;

impl FilterSlot {
    pub fn new() -> Self {
        FilterSlot {
            last_row: AtomicU64::new(NO_ROW),
            last_result: AtomicU8::new(TriState::Unevaluated as u8),
            has_last: std::sync::atomic::AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Returns the memoized result for `row` if this slot already evaluated
    /// it; otherwise `None`, meaning the caller must evaluate and call
    /// `record`.
    pub fn memoized(&self, row: usize) -> Option<bool> {
        if !self.has_last.load(Ordering::Acquire) {
            return None;
        }
        if self.last_row.load(Ordering::Acquire) != row as u64 {
            return None;
        }
        match TriState::from_u8(self.last_result.load(Ordering::Acquire)) {
            TriState::True => Some(true),
            TriState::False => Some(false),
            TriState::Unevaluated => None,
        }
    }

    /// Store the result for `row` and bump the accepted/rejected counter.
    /// Not synchronized against concurrent callers on the same slot — the
    /// per-slot isolation discipline guarantees there is exactly one.
    pub fn record(&self, row: usize, result: bool) {
        self.last_row.store(row as u64, Ordering::Release);
        self.last_result
            .store(if result { TriState::True } else { TriState::False } as u8, Ordering::Release);
        self.has_last.store(true, Ordering::Release);
        if result {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Per-slot DerivedColumn cache: last-examined row plus a shared handle to
/// the last computed value, so that every consumer within the same
/// (slot,row) observes the identical `Arc` allocation.
pub struct DerivedSlot<T> {
    last_row: AtomicU64,
    value: parking_lot::Mutex<Option<(usize, std::sync::Arc<T>)>>,
}

impl<T> Default for DerivedSlot<T> {
    fn default() -> Self {
        DerivedSlot {
            last_row: AtomicU64::new(NO_ROW),
            value: parking_lot::Mutex::new(None),
        }
    }
}

impl<T> DerivedSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `row` if present, else run `compute` and
    /// cache its result. `compute` runs at most once per (slot,row).
    pub fn get_or_compute(&self, row: usize, compute: impl FnOnce() -> T) -> std::sync::Arc<T> {
        let mut guard = self.value.lock();
        if let Some((cached_row, value)) = guard.as_ref() {
            if *cached_row == row {
                return std::sync::Arc::clone(value);
            }
        }
        let value = std::sync::Arc::new(compute());
        *guard = Some((row, std::sync::Arc::clone(&value)));
        self.last_row.store(row as u64, Ordering::Release);
        value
    }

    /// Fallible counterpart of [`get_or_compute`](Self::get_or_compute), for
    /// expressions that can fail (a DerivedColumn's user callable).
    pub fn try_get_or_compute<E>(
        &self,
        row: usize,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<std::sync::Arc<T>, E> {
        {
            let guard = self.value.lock();
            if let Some((cached_row, value)) = guard.as_ref() {
                if *cached_row == row {
                    return Ok(std::sync::Arc::clone(value));
                }
            }
        }
        let value = std::sync::Arc::new(compute()?);
        let mut guard = self.value.lock();
        *guard = Some((row, std::sync::Arc::clone(&value)));
        self.last_row.store(row as u64, Ordering::Release);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_slot_memoizes_same_row() {
        let slot = FilterSlot::new();
        assert_eq!(slot.memoized(3), None);
        slot.record(3, true);
        assert_eq!(slot.memoized(3), Some(true));
        assert_eq!(slot.memoized(4), None);
    }

    #[test]
    fn filter_slot_counts_accepted_and_rejected() {
        let slot = FilterSlot::new();
        slot.record(0, true);
        slot.record(1, false);
        slot.record(2, true);
        assert_eq!(slot.accepted(), 2);
        assert_eq!(slot.rejected(), 1);
    }

    #[test]
    fn derived_slot_computes_once_per_row() {
        let slot = DerivedSlot::default();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let a = slot.get_or_compute(5, || {
            calls.fetch_add(1, Ordering::Relaxed);
            42
        });
        let b = slot.get_or_compute(5, || {
            calls.fetch_add(1, Ordering::Relaxed);
            99
        });
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let c = slot.get_or_compute(6, || {
            calls.fetch_add(1, Ordering::Relaxed);
            7
        });
        assert_eq!(*c, 7);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
