//! Scope stack.
//!
//! Each thread has a stack of scopes rooted in a root scope that lives as long
//! as the thread's runtime. A scope owns two ordered lists: tracked
//! allocations and registered resources.
//!
//! # Pop transfers, it does not destroy
//!
//! [`pop_scope`] splices whatever the popped scope still holds onto the tail of
//! its parent's lists, preserving order. Nothing is freed and no leak is
//! reported: un-released state escalates to the enclosing scope. Destroying
//! that state is a separate, explicit step ([`force_release_all`] and its
//! allocation-only / resource-only variants), normally taken by a handler that
//! has just caught an error and wants to discard partial work. Leaks are only
//! reported when the root scope itself is torn down
//! ([`shutdown`](crate::runtime::shutdown) or thread exit).

use std::panic::Location;

use crate::context::{Protection, ThreadTag, with_context};
use crate::diag::LeakReport;
use crate::error::ScopeError;
use crate::signal;
use crate::stats;

/// Identity of one scope on one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    depth: u32,
    serial: u64,
    thread: ThreadTag,
}

impl ScopeId {
    /// Distance from the root scope (the root has depth 0).
    #[must_use]
    pub const fn depth(self) -> usize {
        self.depth as usize
    }

    #[must_use]
    pub const fn is_root(self) -> bool {
        self.depth == 0
    }

    /// Returns true while this scope is still on the calling thread's stack.
    #[must_use]
    pub fn is_live(self) -> bool {
        with_context(|cx| cx.tag == self.thread && cx.scope_is_live(self.depth(), self.serial))
    }
}

/// Diagnostic view of the current scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeStats {
    pub depth: usize,
    pub allocations: usize,
    pub bytes: usize,
    pub resources: usize,
    pub protected: bool,
}

/// The calling thread's current scope.
#[must_use]
pub fn current_scope() -> ScopeId {
    with_context(|cx| {
        let depth = cx.current_index();
        ScopeId {
            depth: depth as u32,
            serial: cx.current().serial,
            thread: cx.tag,
        }
    })
}

/// Number of scopes above the root.
#[must_use]
pub fn depth() -> usize {
    with_context(|cx| cx.current_index())
}

/// Push a new, unprotected scope and make it current.
pub fn push_scope() -> ScopeId {
    with_context(|cx| {
        let (depth, serial) = cx.push();
        ScopeId {
            depth: depth as u32,
            serial,
            thread: cx.tag,
        }
    })
}

/// Pop the current scope, transferring anything it still holds to its parent.
///
/// Popping the root scope is fatal; runtime shutdown tears it down instead.
#[track_caller]
pub fn pop_scope() {
    let location = Location::caller();
    if let Err(err) = try_pop_scope() {
        signal::fatal_at(location, &err.to_string());
    }
}

/// Checked [`pop_scope`]; returns the new current scope.
pub fn try_pop_scope() -> Result<ScopeId, ScopeError> {
    with_context(|cx| {
        cx.pop()?;
        Ok(ScopeId {
            depth: cx.current_index() as u32,
            serial: cx.current().serial,
            thread: cx.tag,
        })
    })
}

/// Release every resource and every allocation the current scope holds.
pub fn force_release_all() {
    force_release_resources();
    force_release_allocations();
}

/// Free every allocation the current scope holds, head first.
pub fn force_release_allocations() {
    let blocks = with_context(|cx| {
        let depth = cx.current_index();
        cx.drain_allocations(depth)
    });
    for block in blocks {
        stats::note_release(block.len());
    }
}

/// Release every resource the current scope holds, most recent first.
///
/// Each release callback runs with no runtime state borrowed, so callbacks may
/// release allocations or unregister other resources. If a callback raises,
/// the resources not yet visited stay registered.
pub fn force_release_resources() {
    let (depth, serial) = with_context(|cx| (cx.current_index(), cx.current().serial));
    loop {
        let next = with_context(|cx| {
            if !cx.scope_is_live(depth, serial) {
                return None;
            }
            cx.pop_resource(depth)
        });
        let Some(resource) = next else {
            break;
        };
        stats::note_unregister(1);
        resource.release();
    }
}

/// Message of the most recent error raised in the current scope.
#[must_use]
pub fn current_error() -> Option<String> {
    with_context(|cx| cx.current().last_error.clone())
}

/// What the current scope still holds, reported to stderr if non-empty.
pub fn check() -> LeakReport {
    let report = with_context(|cx| {
        let depth = cx.current_index();
        cx.report_for(depth)
    });
    crate::diag::emit("check", &report);
    report
}

/// Counters of the current scope.
#[must_use]
pub fn scope_stats() -> ScopeStats {
    with_context(|cx| {
        let scope = cx.current();
        ScopeStats {
            depth: cx.current_index(),
            allocations: scope.allocs.len(),
            bytes: scope.bytes,
            resources: scope.resources.len(),
            protected: matches!(scope.protection, Protection::Protected(_)),
        }
    })
}
