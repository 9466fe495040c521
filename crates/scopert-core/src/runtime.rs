//! Runtime lifecycle.
//!
//! A thread's runtime starts lazily on first use with an empty, Fatal root
//! scope. [`shutdown`] ends it explicitly; a thread that exits without calling
//! it gets the same leak check from its thread-local destructor, except that
//! un-released resources are leaked rather than dropped there.

use crate::context::{Teardown, with_context};
use crate::diag::{self, LeakReport};
use crate::stats::{self, CounterSnapshot};

/// Tear down the calling thread's runtime.
///
/// Collapses every open scope into the root (transferring, as `pop_scope`
/// does), reports what the root still holds, frees the remaining tracked
/// memory, and drops un-released resources *without* calling their release
/// step. The thread is left with a fresh root scope and may keep using the
/// runtime.
pub fn shutdown() -> LeakReport {
    let Teardown {
        report,
        blocks,
        resources,
    } = with_context(|cx| cx.teardown());

    diag::emit("shutdown", &report);
    for block in blocks {
        stats::note_release(block.len());
    }
    stats::note_unregister(resources.len());
    drop(resources);
    report
}

/// Report the process-wide totals of everything still live on any thread.
///
/// Intended for process teardown, after worker threads have been joined.
pub fn report_global_leaks() -> CounterSnapshot {
    let snapshot = stats::snapshot();
    diag::emit_global(&snapshot);
    snapshot
}
