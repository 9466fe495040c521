//! Process-wide diagnostic counters.
//!
//! Aggregate totals of live tracked allocations, their bytes, and live tracked
//! resources across every thread. These feed the process-teardown leak report
//! only; no control flow depends on them.
//!
//! The lock is held for the O(1) adjustment and nothing else: never across an
//! allocation, a resource release, or any output. With the `diagnostics`
//! feature disabled every adjustment compiles to nothing and snapshots are zero.

#[cfg(feature = "diagnostics")]
use parking_lot::Mutex;

/// Point-in-time copy of the process-wide counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Live tracked allocations.
    pub allocations: u64,
    /// Payload bytes held by live tracked allocations.
    pub bytes: u64,
    /// Live registered resources.
    pub resources: u64,
}

impl CounterSnapshot {
    /// Returns true if nothing is live.
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        self.allocations == 0 && self.bytes == 0 && self.resources == 0
    }
}

#[cfg(feature = "diagnostics")]
static COUNTERS: Mutex<CounterSnapshot> = Mutex::new(CounterSnapshot {
    allocations: 0,
    bytes: 0,
    resources: 0,
});

#[inline]
pub(crate) fn note_allocate(bytes: usize) {
    #[cfg(feature = "diagnostics")]
    {
        let mut counters = COUNTERS.lock();
        counters.allocations += 1;
        counters.bytes += bytes as u64;
    }
    #[cfg(not(feature = "diagnostics"))]
    let _ = bytes;
}

#[inline]
pub(crate) fn note_release(bytes: usize) {
    #[cfg(feature = "diagnostics")]
    {
        let mut counters = COUNTERS.lock();
        counters.allocations = counters.allocations.saturating_sub(1);
        counters.bytes = counters.bytes.saturating_sub(bytes as u64);
    }
    #[cfg(not(feature = "diagnostics"))]
    let _ = bytes;
}

#[inline]
pub(crate) fn note_resize(old_bytes: usize, new_bytes: usize) {
    #[cfg(feature = "diagnostics")]
    {
        let mut counters = COUNTERS.lock();
        counters.bytes = counters
            .bytes
            .saturating_sub(old_bytes as u64)
            .saturating_add(new_bytes as u64);
    }
    #[cfg(not(feature = "diagnostics"))]
    let _ = (old_bytes, new_bytes);
}

#[inline]
pub(crate) fn note_register() {
    #[cfg(feature = "diagnostics")]
    {
        COUNTERS.lock().resources += 1;
    }
}

#[inline]
pub(crate) fn note_unregister(count: usize) {
    #[cfg(feature = "diagnostics")]
    {
        let mut counters = COUNTERS.lock();
        counters.resources = counters.resources.saturating_sub(count as u64);
    }
    #[cfg(not(feature = "diagnostics"))]
    let _ = count;
}

/// Snapshot the process-wide counters.
#[must_use]
pub fn snapshot() -> CounterSnapshot {
    #[cfg(feature = "diagnostics")]
    {
        *COUNTERS.lock()
    }
    #[cfg(not(feature = "diagnostics"))]
    {
        CounterSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_clear() {
        assert!(CounterSnapshot::default().is_clear());
        let busy = CounterSnapshot {
            allocations: 1,
            bytes: 0,
            resources: 0,
        };
        assert!(!busy.is_clear());
    }
}
