//! Tracked allocator.
//!
//! Every allocation is attached to the calling thread's current scope at the
//! moment it is made (or reallocated), and stays on that scope's list until it
//! is released, force-released, or handed to the parent scope by a pop.
//!
//! Handles are `Copy` and carry no destructor: dropping an [`Allocation`]
//! never frees anything. Only explicit release, rollback, or runtime shutdown
//! does.
//!
//! Allocator refusal is fatal: the process prints
//! `<file>:<line>: out of memory allocating <n> bytes` and aborts.

use std::panic::Location;

use crate::block::{AllocFailure, Block};
use crate::context::{ThreadTag, with_context};
use crate::error::ScopeError;
use crate::list::SlotKey;
use crate::signal;
use crate::stats;
use crate::trace::AllocTrace;

/// Handle to one tracked heap allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    key: SlotKey,
    thread: ThreadTag,
}

impl Allocation {
    /// Payload size in bytes.
    #[track_caller]
    #[must_use]
    pub fn size(self) -> usize {
        let location = Location::caller();
        with_context(|cx| cx.tracked(self.thread, self.key).map(|t| t.block.len()))
            .unwrap_or_else(|err| misuse(location, err))
    }

    /// Payload address, aligned to [`BLOCK_ALIGN`](crate::BLOCK_ALIGN).
    ///
    /// Valid until the allocation is released or reallocated.
    #[track_caller]
    #[must_use]
    pub fn as_ptr(self) -> *mut u8 {
        let location = Location::caller();
        with_context(|cx| cx.tracked(self.thread, self.key).map(|t| t.block.as_ptr()))
            .unwrap_or_else(|err| misuse(location, err))
    }

    /// Copy of the payload.
    #[track_caller]
    #[must_use]
    pub fn read_bytes(self) -> Vec<u8> {
        let location = Location::caller();
        with_context(|cx| {
            cx.tracked(self.thread, self.key)
                .map(|t| t.block.as_slice().to_vec())
        })
        .unwrap_or_else(|err| misuse(location, err))
    }

    /// Copy `data` into the payload at `offset`.
    pub fn write_bytes(self, offset: usize, data: &[u8]) -> Result<(), ScopeError> {
        with_context(|cx| {
            let tracked = cx.tracked_mut(self.thread, self.key)?;
            let payload = tracked.block.as_mut_slice();
            let size = payload.len();
            let end = offset
                .checked_add(data.len())
                .filter(|end| *end <= size)
                .ok_or(ScopeError::OutOfBounds {
                    offset,
                    len: data.len(),
                    size,
                })?;
            payload[offset..end].copy_from_slice(data);
            Ok(())
        })
    }
}

fn misuse(location: &'static Location<'static>, err: ScopeError) -> ! {
    signal::fatal_at(location, &err.to_string())
}

fn out_of_memory(location: &'static Location<'static>, failure: AllocFailure) -> ! {
    signal::fatal_at(
        location,
        &format!("out of memory allocating {} bytes", failure.requested),
    )
}

/// Allocate `size` zeroed bytes on the current scope.
#[track_caller]
#[must_use]
pub fn allocate(size: usize) -> Allocation {
    let location = Location::caller();
    let block = Block::zeroed(size).unwrap_or_else(|failure| out_of_memory(location, failure));
    let trace = AllocTrace::capture();
    let (key, thread) = with_context(|cx| (cx.track(block, trace), cx.tag));
    stats::note_allocate(size);
    Allocation { key, thread }
}

/// Resize an allocation, or allocate when `previous` is `None`.
///
/// The allocation is re-attached to the tail of the *current* scope, which
/// need not be the scope it was allocated in. The handle stays the same; the
/// payload address may change. The first `min(old, new)` bytes are kept and
/// any growth is zeroed.
#[track_caller]
#[must_use]
pub fn reallocate(previous: Option<Allocation>, size: usize) -> Allocation {
    let location = Location::caller();
    try_reallocate(previous, size).unwrap_or_else(|err| misuse(location, err))
}

/// Checked [`reallocate`]: handle misuse is returned instead of aborting.
#[track_caller]
pub fn try_reallocate(previous: Option<Allocation>, size: usize) -> Result<Allocation, ScopeError> {
    let Some(previous) = previous else {
        return Ok(allocate(size));
    };
    let location = Location::caller();
    let trace = AllocTrace::capture();
    match with_context(|cx| cx.resize(previous.thread, previous.key, size, trace))? {
        Ok(old_size) => {
            stats::note_resize(old_size, size);
            Ok(previous)
        }
        Err(failure) => out_of_memory(location, failure),
    }
}

/// Release an allocation back to the underlying allocator.
///
/// Releasing a stale handle (double free) or another thread's allocation is
/// fatal.
#[track_caller]
pub fn release(allocation: Allocation) {
    let location = Location::caller();
    if let Err(err) = try_release(allocation) {
        misuse(location, err);
    }
}

/// Checked [`release`]; returns the payload size that was freed.
pub fn try_release(allocation: Allocation) -> Result<usize, ScopeError> {
    let block = with_context(|cx| cx.untrack(allocation.thread, allocation.key))?;
    let size = block.len();
    drop(block);
    stats::note_release(size);
    Ok(size)
}

/// Release `allocation` if present; `None` is a no-op.
#[track_caller]
pub fn release_if_present(allocation: Option<Allocation>) {
    if let Some(allocation) = allocation {
        release(allocation);
    }
}

/// Release every allocation in `allocations`.
#[track_caller]
pub fn release_all(allocations: impl IntoIterator<Item = Allocation>) {
    for allocation in allocations {
        release(allocation);
    }
}

/// Release whatever `slot` holds and store `value` in its place.
#[track_caller]
pub fn replace(slot: &mut Option<Allocation>, value: Option<Allocation>) {
    release_if_present(slot.take());
    *slot = value;
}

/// Allocate a copy of `bytes` on the current scope.
#[track_caller]
#[must_use]
pub fn duplicate(bytes: &[u8]) -> Allocation {
    let allocation = allocate(bytes.len());
    let location = Location::caller();
    if let Err(err) = allocation.write_bytes(0, bytes) {
        misuse(location, err);
    }
    allocation
}

/// Recover the handle of the live allocation whose payload starts at `ptr`.
///
/// Only allocations made on the calling thread are found.
#[must_use]
pub fn find_allocation(ptr: *const u8) -> Option<Allocation> {
    with_context(|cx| {
        cx.lookup_address(ptr as usize).map(|key| Allocation {
            key,
            thread: cx.tag,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope;

    #[test]
    fn allocate_attaches_to_current_scope() {
        scope::push_scope();
        let a = allocate(32);
        let stats = scope::scope_stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.bytes, 32);
        assert_eq!(a.size(), 32);
        assert!(a.read_bytes().iter().all(|b| *b == 0));

        release(a);
        assert_eq!(scope::scope_stats().allocations, 0);
        assert_eq!(scope::scope_stats().bytes, 0);
        scope::pop_scope();
    }

    #[test]
    fn payload_is_aligned() {
        scope::push_scope();
        let a = allocate(3);
        assert_eq!(a.as_ptr() as usize % crate::BLOCK_ALIGN, 0);
        release(a);
        scope::pop_scope();
    }

    #[test]
    fn reallocate_none_behaves_like_allocate() {
        scope::push_scope();
        let a = reallocate(None, 24);
        assert_eq!(a.size(), 24);
        assert_eq!(scope::scope_stats().allocations, 1);
        assert_eq!(scope::scope_stats().bytes, 24);
        release(a);
        scope::pop_scope();
    }

    #[test]
    fn reallocate_keeps_prefix_and_zeroes_growth() {
        scope::push_scope();
        let a = duplicate(b"abcd");
        let a = reallocate(Some(a), 8);
        assert_eq!(a.read_bytes(), b"abcd\0\0\0\0");
        let a = reallocate(Some(a), 2);
        assert_eq!(a.read_bytes(), b"ab");
        assert_eq!(scope::scope_stats().bytes, 2);
        release(a);
        scope::pop_scope();
    }

    #[test]
    fn reallocate_reparents_into_current_scope() {
        scope::push_scope();
        let a = allocate(8);
        scope::push_scope();
        let a = reallocate(Some(a), 16);
        assert_eq!(scope::scope_stats().allocations, 1);
        assert_eq!(scope::scope_stats().bytes, 16);

        scope::force_release_allocations();
        assert_eq!(try_release(a), Err(ScopeError::StaleAllocation {
            index: a.key.index,
            generation: a.key.generation,
        }));
        scope::pop_scope();
        assert_eq!(scope::scope_stats().allocations, 0);
        scope::pop_scope();
    }

    #[test]
    fn double_release_is_reported_by_checked_variant() {
        scope::push_scope();
        let a = allocate(4);
        assert_eq!(try_release(a), Ok(4));
        assert!(matches!(
            try_release(a),
            Err(ScopeError::StaleAllocation { .. })
        ));
        scope::pop_scope();
    }

    #[test]
    fn write_bytes_checks_bounds() {
        scope::push_scope();
        let a = allocate(4);
        assert_eq!(a.write_bytes(1, b"xyz"), Ok(()));
        assert_eq!(a.read_bytes(), b"\0xyz");
        assert_eq!(
            a.write_bytes(2, b"xyz"),
            Err(ScopeError::OutOfBounds {
                offset: 2,
                len: 3,
                size: 4
            })
        );
        assert!(a.write_bytes(usize::MAX, b"x").is_err());
        release(a);
        scope::pop_scope();
    }

    #[test]
    fn find_allocation_recovers_handle_from_address() {
        scope::push_scope();
        let a = allocate(10);
        assert_eq!(find_allocation(a.as_ptr()), Some(a));
        let moved = reallocate(Some(a), 1 << 20);
        assert_eq!(find_allocation(moved.as_ptr()), Some(a));
        release(moved);
        assert_eq!(find_allocation(std::ptr::null()), None);
        scope::pop_scope();
    }

    #[test]
    fn replace_releases_previous_value() {
        scope::push_scope();
        let mut slot = Some(allocate(4));
        replace(&mut slot, Some(allocate(6)));
        assert_eq!(scope::scope_stats().allocations, 1);
        assert_eq!(scope::scope_stats().bytes, 6);
        replace(&mut slot, None);
        assert!(slot.is_none());
        assert_eq!(scope::scope_stats().allocations, 0);
        scope::pop_scope();
    }

    #[test]
    fn release_all_and_release_if_present() {
        scope::push_scope();
        let batch = [allocate(1), allocate(2), allocate(3)];
        release_all(batch);
        release_if_present(None);
        release_if_present(Some(allocate(5)));
        assert!(scope::check().is_clean());
        scope::pop_scope();
    }

    #[test]
    fn handle_from_another_thread_is_rejected() {
        scope::push_scope();
        let a = allocate(4);
        let err = std::thread::spawn(move || try_release(a))
            .join()
            .expect("thread");
        assert!(matches!(err, Err(ScopeError::ForeignThread { .. })));
        release(a);
        scope::pop_scope();
    }
}
