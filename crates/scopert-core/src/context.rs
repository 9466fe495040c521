//! Per-thread runtime context.
//!
//! Each thread reaches exactly one [`ThreadContext`] through thread-local
//! storage. It owns the thread's scope stack (index 0 is the root scope) and
//! the two slabs whose index-linked lists make up every scope's allocation and
//! resource lists. Nothing in here is shared across threads, so none of it is
//! locked.
//!
//! Borrow discipline: the context is borrowed only for bookkeeping. User code
//! (resource release callbacks, protected bodies) and anything that may drop
//! user values always runs after the borrow has ended.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::block::{AllocFailure, Block};
use crate::diag::{LeakReport, LeakedAllocation};
use crate::error::ScopeError;
use crate::list::{ListHead, Slab, SlotKey};
use crate::resource::Resource;
use crate::signal;
use crate::stats;
use crate::trace::AllocTrace;

/// Process-unique tag of a thread's context; stamped into every handle.
pub(crate) type ThreadTag = u64;

static NEXT_THREAD_TAG: AtomicU64 = AtomicU64::new(1);

/// Resource tokens are process-unique and never reused; 0 is never issued.
static NEXT_RESOURCE_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Catch-point identity; unique per thread.
pub(crate) type PointId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Protection {
    /// Any raise in this scope aborts the process.
    Fatal,
    /// A raise in this scope unwinds to the given catch point.
    Protected(PointId),
}

pub(crate) struct Tracked {
    pub(crate) block: Block,
    pub(crate) scope: u32,
    pub(crate) trace: Option<AllocTrace>,
}

pub(crate) struct Registered {
    pub(crate) resource: Box<dyn Resource>,
    pub(crate) scope: u32,
    pub(crate) token: u64,
}

pub(crate) struct ScopeRecord {
    pub(crate) serial: u64,
    pub(crate) protection: Protection,
    pub(crate) last_error: Option<String>,
    pub(crate) allocs: ListHead,
    pub(crate) resources: ListHead,
    pub(crate) bytes: usize,
}

impl ScopeRecord {
    fn new(serial: u64, protection: Protection) -> Self {
        Self {
            serial,
            protection,
            last_error: None,
            allocs: ListHead::EMPTY,
            resources: ListHead::EMPTY,
            bytes: 0,
        }
    }
}

/// Everything a root-scope teardown hands back for disposal outside the borrow.
pub(crate) struct Teardown {
    pub(crate) report: LeakReport,
    pub(crate) blocks: Vec<Block>,
    pub(crate) resources: Vec<Box<dyn Resource>>,
}

pub(crate) struct ThreadContext {
    pub(crate) tag: ThreadTag,
    pub(crate) scopes: Vec<ScopeRecord>,
    pub(crate) allocations: Slab<Tracked>,
    pub(crate) resources: Slab<Registered>,
    addresses: HashMap<usize, SlotKey>,
    tokens: HashMap<u64, SlotKey>,
    next_serial: u64,
    next_point: PointId,
}

impl ThreadContext {
    fn new() -> Self {
        Self {
            tag: NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed),
            scopes: vec![ScopeRecord::new(0, Protection::Fatal)],
            allocations: Slab::new(),
            resources: Slab::new(),
            addresses: HashMap::new(),
            tokens: HashMap::new(),
            next_serial: 1,
            next_point: 1,
        }
    }

    #[inline]
    pub(crate) fn current_index(&self) -> usize {
        self.scopes.len() - 1
    }

    #[inline]
    pub(crate) fn current(&self) -> &ScopeRecord {
        &self.scopes[self.current_index()]
    }

    #[inline]
    pub(crate) fn current_mut(&mut self) -> &mut ScopeRecord {
        let index = self.current_index();
        &mut self.scopes[index]
    }

    pub(crate) fn check_thread(&self, owner: ThreadTag) -> Result<(), ScopeError> {
        if owner == self.tag {
            Ok(())
        } else {
            Err(ScopeError::ForeignThread {
                owner,
                current: self.tag,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Scope stack
    // -----------------------------------------------------------------------

    pub(crate) fn push(&mut self) -> (usize, u64) {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.scopes.push(ScopeRecord::new(serial, Protection::Fatal));
        (self.current_index(), serial)
    }

    /// Pop the current scope, handing its entries to the parent in order.
    pub(crate) fn pop(&mut self) -> Result<(), ScopeError> {
        if self.scopes.len() <= 1 {
            return Err(ScopeError::RootScope);
        }
        let Some(mut child) = self.scopes.pop() else {
            return Err(ScopeError::RootScope);
        };
        let parent_index = self.current_index();
        let parent_label = parent_index as u32;

        self.allocations
            .for_each_mut(&child.allocs, |tracked| tracked.scope = parent_label);
        self.resources
            .for_each_mut(&child.resources, |registered| registered.scope = parent_label);

        let parent = &mut self.scopes[parent_index];
        self.allocations
            .splice_back(&mut parent.allocs, &mut child.allocs);
        self.resources
            .splice_back(&mut parent.resources, &mut child.resources);
        parent.bytes += child.bytes;

        Ok(())
    }

    /// Returns true if `serial` still names the live scope at `depth`.
    pub(crate) fn scope_is_live(&self, depth: usize, serial: u64) -> bool {
        self.scopes.get(depth).is_some_and(|s| s.serial == serial)
    }

    // -----------------------------------------------------------------------
    // Catch points
    // -----------------------------------------------------------------------

    /// Install a fresh catch point on the current scope.
    ///
    /// Returns `(depth, serial, point, previous protection)` so the caller can
    /// restore the superseded state when the protected region ends.
    pub(crate) fn establish(&mut self) -> (usize, u64, PointId, Protection) {
        let point = self.next_point;
        self.next_point += 1;
        let depth = self.current_index();
        let scope = &mut self.scopes[depth];
        let previous = std::mem::replace(&mut scope.protection, Protection::Protected(point));
        (depth, scope.serial, point, previous)
    }

    pub(crate) fn restore_protection(&mut self, depth: usize, serial: u64, previous: Protection) {
        if self.scope_is_live(depth, serial) {
            self.scopes[depth].protection = previous;
        }
    }

    // -----------------------------------------------------------------------
    // Allocations
    // -----------------------------------------------------------------------

    pub(crate) fn track(&mut self, block: Block, trace: Option<AllocTrace>) -> SlotKey {
        let index = self.current_index();
        let addr = block.as_ptr() as usize;
        let size = block.len();

        let scope = &mut self.scopes[index];
        let key = self.allocations.push_back(
            &mut scope.allocs,
            Tracked {
                block,
                scope: index as u32,
                trace,
            },
        );
        scope.bytes += size;
        self.addresses.insert(addr, key);
        key
    }

    pub(crate) fn tracked(&self, owner: ThreadTag, key: SlotKey) -> Result<&Tracked, ScopeError> {
        self.check_thread(owner)?;
        self.allocations.get(key).ok_or(ScopeError::StaleAllocation {
            index: key.index,
            generation: key.generation,
        })
    }

    pub(crate) fn tracked_mut(
        &mut self,
        owner: ThreadTag,
        key: SlotKey,
    ) -> Result<&mut Tracked, ScopeError> {
        self.check_thread(owner)?;
        self.allocations
            .get_mut(key)
            .ok_or(ScopeError::StaleAllocation {
                index: key.index,
                generation: key.generation,
            })
    }

    /// Detach an allocation from its owning scope and hand back its block.
    pub(crate) fn untrack(&mut self, owner: ThreadTag, key: SlotKey) -> Result<Block, ScopeError> {
        let scope_index = self.tracked(owner, key)?.scope as usize;
        let scope = &mut self.scopes[scope_index];
        let Some(tracked) = self.allocations.remove(&mut scope.allocs, key) else {
            return Err(ScopeError::StaleAllocation {
                index: key.index,
                generation: key.generation,
            });
        };
        scope.bytes -= tracked.block.len();
        self.addresses.remove(&(tracked.block.as_ptr() as usize));
        Ok(tracked.block)
    }

    /// Resize an allocation and re-parent it onto the current scope's tail.
    ///
    /// The outer error is handle misuse; the inner one is an allocator refusal,
    /// in which case the allocation is left untouched where it was.
    pub(crate) fn resize(
        &mut self,
        owner: ThreadTag,
        key: SlotKey,
        new_size: usize,
        trace: Option<AllocTrace>,
    ) -> Result<Result<usize, AllocFailure>, ScopeError> {
        let current = self.current_index();
        let tracked = self.tracked_mut(owner, key)?;
        let from = tracked.scope as usize;
        let old_addr = tracked.block.as_ptr() as usize;
        let old_size = tracked.block.len();

        if let Err(failure) = tracked.block.resize(new_size) {
            return Ok(Err(failure));
        }
        tracked.scope = current as u32;
        if trace.is_some() {
            tracked.trace = trace;
        }
        let new_addr = tracked.block.as_ptr() as usize;

        if new_addr != old_addr {
            self.addresses.remove(&old_addr);
            self.addresses.insert(new_addr, key);
        }

        let mut source = self.scopes[from].allocs;
        if from == current {
            self.allocations.relink_back_within(&mut source, key);
            self.scopes[from].allocs = source;
        } else {
            let mut target = self.scopes[current].allocs;
            self.allocations.relink_back(&mut source, &mut target, key);
            self.scopes[from].allocs = source;
            self.scopes[current].allocs = target;
        }
        self.scopes[from].bytes -= old_size;
        self.scopes[current].bytes += new_size;

        Ok(Ok(old_size))
    }

    pub(crate) fn lookup_address(&self, addr: usize) -> Option<SlotKey> {
        self.addresses.get(&addr).copied()
    }

    /// Detach every allocation of the scope at `depth`, head first.
    pub(crate) fn drain_allocations(&mut self, depth: usize) -> Vec<Block> {
        let Some(scope) = self.scopes.get_mut(depth) else {
            return Vec::new();
        };
        let mut blocks = Vec::with_capacity(scope.allocs.len());
        while let Some(tracked) = self.allocations.pop_front(&mut scope.allocs) {
            self.addresses.remove(&(tracked.block.as_ptr() as usize));
            blocks.push(tracked.block);
        }
        scope.bytes = 0;
        blocks
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    pub(crate) fn register(&mut self, resource: Box<dyn Resource>) -> (SlotKey, u64) {
        let index = self.current_index();
        let token = NEXT_RESOURCE_TOKEN.fetch_add(1, Ordering::Relaxed);
        let scope = &mut self.scopes[index];
        let key = self.resources.push_back(
            &mut scope.resources,
            Registered {
                resource,
                scope: index as u32,
                token,
            },
        );
        self.tokens.insert(token, key);
        (key, token)
    }

    /// Slot of a live resource registered on this thread under `token`.
    pub(crate) fn resolve_token(&self, token: u64) -> Result<SlotKey, ScopeError> {
        self.tokens
            .get(&token)
            .copied()
            .ok_or(ScopeError::UnknownToken { token })
    }

    pub(crate) fn unregister(
        &mut self,
        owner: ThreadTag,
        key: SlotKey,
    ) -> Result<Box<dyn Resource>, ScopeError> {
        self.check_thread(owner)?;
        let stale = ScopeError::StaleResource {
            index: key.index,
            generation: key.generation,
        };
        let scope_index = self.resources.get(key).ok_or(stale)?.scope as usize;
        let scope = &mut self.scopes[scope_index];
        let registered = self.resources.remove(&mut scope.resources, key).ok_or(stale)?;
        self.tokens.remove(&registered.token);
        Ok(registered.resource)
    }

    /// Detach the most recently registered resource of the scope at `depth`.
    pub(crate) fn pop_resource(&mut self, depth: usize) -> Option<Box<dyn Resource>> {
        let scope = self.scopes.get_mut(depth)?;
        let registered = self.resources.pop_back(&mut scope.resources)?;
        self.tokens.remove(&registered.token);
        Some(registered.resource)
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub(crate) fn report_for(&self, depth: usize) -> LeakReport {
        let Some(scope) = self.scopes.get(depth) else {
            return LeakReport::default();
        };
        if scope.allocs.is_empty() && scope.resources.is_empty() {
            return LeakReport::default();
        }
        let mut leaked = Vec::with_capacity(scope.allocs.len());
        self.allocations.for_each(&scope.allocs, |_, tracked| {
            leaked.push(LeakedAllocation {
                size: tracked.block.len(),
                trace: tracked.trace.clone(),
            });
        });
        LeakReport {
            allocations: scope.allocs.len(),
            bytes: scope.bytes,
            resources: scope.resources.len(),
            leaked,
        }
    }

    /// Collapse every scope into the root, detach everything the root still
    /// holds, and start over with an empty root.
    pub(crate) fn teardown(&mut self) -> Teardown {
        while self.pop().is_ok() {}

        let report = self.report_for(0);
        let blocks = self.drain_allocations(0);
        let mut resources = Vec::with_capacity(report.resources);
        while let Some(resource) = self.pop_resource(0) {
            resources.push(resource);
        }

        debug_assert_eq!(self.allocations.occupied(), 0);
        debug_assert_eq!(self.resources.occupied(), 0);
        debug_assert!(self.tokens.is_empty());

        let root = &mut self.scopes[0];
        root.protection = Protection::Fatal;
        root.last_error = None;

        Teardown {
            report,
            blocks,
            resources,
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        let Teardown {
            report,
            blocks,
            resources,
        } = self.teardown();

        crate::diag::emit("thread exit", &report);
        for block in blocks {
            stats::note_release(block.len());
        }
        stats::note_unregister(resources.len());
        // Thread-local storage is going away: a release callback or a captured
        // value's destructor could not reach the runtime anymore.
        std::mem::forget(resources);
    }
}

thread_local! {
    static CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::new());
}

/// Run `f` against the calling thread's context.
///
/// Using the runtime from a thread-local destructor that runs after this
/// thread's context was destroyed is fatal.
#[track_caller]
pub(crate) fn with_context<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> R {
    let location = Location::caller();
    match CONTEXT.try_with(|cell| f(&mut cell.borrow_mut())) {
        Ok(value) => value,
        Err(_) => signal::fatal_at(location, "scopert runtime used during thread teardown"),
    }
}

/// Like [`with_context`], but silently does nothing once the context is gone.
pub(crate) fn try_with_context<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> Option<R> {
    CONTEXT.try_with(|cell| f(&mut cell.borrow_mut())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_fatal_root() {
        let cx = ThreadContext::new();
        assert_eq!(cx.scopes.len(), 1);
        assert_eq!(cx.current().protection, Protection::Fatal);
        assert!(cx.current().last_error.is_none());
    }

    #[test]
    fn pop_moves_entries_to_parent_and_relabels() {
        let mut cx = ThreadContext::new();
        let root_block = Block::zeroed(8).expect("alloc");
        cx.track(root_block, None);
        cx.push();
        let key = cx.track(Block::zeroed(16).expect("alloc"), None);
        cx.register(Box::new(|| {}));

        cx.pop().expect("pop child");

        assert_eq!(cx.scopes.len(), 1);
        assert_eq!(cx.scopes[0].allocs.len(), 2);
        assert_eq!(cx.scopes[0].resources.len(), 1);
        assert_eq!(cx.scopes[0].bytes, 24);
        assert_eq!(cx.allocations.get(key).map(|t| t.scope), Some(0));

        let _ = cx.teardown();
    }

    #[test]
    fn root_cannot_be_popped() {
        let mut cx = ThreadContext::new();
        assert_eq!(cx.pop(), Err(ScopeError::RootScope));
    }

    #[test]
    fn resize_reparents_to_current_scope() {
        let mut cx = ThreadContext::new();
        let tag = cx.tag;
        let key = cx.track(Block::zeroed(4).expect("alloc"), None);
        cx.push();

        let old = cx
            .resize(tag, key, 64, None)
            .expect("valid handle")
            .expect("resize");
        assert_eq!(old, 4);
        assert_eq!(cx.scopes[0].allocs.len(), 0);
        assert_eq!(cx.scopes[0].bytes, 0);
        assert_eq!(cx.scopes[1].allocs.len(), 1);
        assert_eq!(cx.scopes[1].bytes, 64);

        let _ = cx.teardown();
    }

    #[test]
    fn foreign_tag_is_rejected() {
        let mut cx = ThreadContext::new();
        let key = cx.track(Block::zeroed(4).expect("alloc"), None);
        let err = cx.untrack(cx.tag + 1_000, key).expect_err("foreign");
        assert!(matches!(err, ScopeError::ForeignThread { .. }));
        let _ = cx.teardown();
    }

    #[test]
    fn teardown_reports_and_resets() {
        let mut cx = ThreadContext::new();
        cx.track(Block::zeroed(16).expect("alloc"), None);
        cx.push();
        cx.register(Box::new(|| {}));

        let teardown = cx.teardown();
        assert_eq!(teardown.report.allocations, 1);
        assert_eq!(teardown.report.bytes, 16);
        assert_eq!(teardown.report.resources, 1);
        assert_eq!(teardown.blocks.len(), 1);
        assert_eq!(teardown.resources.len(), 1);
        assert_eq!(cx.scopes.len(), 1);
        assert!(cx.report_for(0).is_clean());
    }

    #[test]
    fn empty_scope_reports_clean_after_release() {
        let mut cx = ThreadContext::new();
        cx.push();
        assert_eq!(cx.report_for(1), LeakReport::default());

        cx.track(Block::zeroed(24).expect("alloc"), None);
        assert_eq!(cx.report_for(1).bytes, 24);
        let _ = cx.drain_allocations(1);
        assert_eq!(cx.report_for(1), LeakReport::default());
        cx.pop().expect("pop child");
    }

    #[test]
    fn tokens_retire_with_their_resource() {
        let mut cx = ThreadContext::new();
        let (first, first_token) = cx.register(Box::new(|| {}));
        let (_, second_token) = cx.register(Box::new(|| {}));
        assert_ne!(first_token, second_token);
        assert_eq!(cx.resolve_token(first_token), Ok(first));

        drop(cx.unregister(cx.tag, first).expect("live"));
        assert_eq!(
            cx.resolve_token(first_token),
            Err(ScopeError::UnknownToken { token: first_token })
        );

        drop(cx.pop_resource(0));
        assert!(cx.resolve_token(second_token).is_err());
        assert!(cx.tokens.is_empty());
    }
}
