//! Resource-scoped error signaling and allocation tracking.
//!
//! Every heap allocation and every registered non-memory resource is tracked
//! against a per-thread stack of nested scopes. Errors raised inside a
//! protected region unwind to its catch point with everything tracked still in
//! place, so the handler can roll back partial work explicitly. Errors raised
//! anywhere else abort the process with their source location.
//!
//! # Architecture
//!
//! - **Tracked allocator** (`alloc`): zeroed, 16-byte aligned blocks attached
//!   to the current scope
//! - **Resources** (`resource`): disposable values registered on the current
//!   scope
//! - **Scope stack** (`scope`): push, pop-with-transfer, rollback, leak checks
//! - **Signaling** (`signal`): `protect`, `raise!`, `abort_with!`
//! - **Runtime** (`runtime`): thread teardown and process-wide leak report
//! - **Counters** (`stats`): process-wide live totals behind one mutex
//! - **Configuration** (`config`): leak-report verbosity
//!
//! # Example
//!
//! ```
//! use scopert_core::{allocate, force_release_all, pop_scope, protect, push_scope, raise};
//! use scopert_core::{register_resource, scope_stats};
//!
//! push_scope();
//! let _buffer = allocate(16);
//! let caught: Result<(), _> = protect(|| {
//!     register_resource(|| println!("closing"));
//!     raise!("boom {}", 1);
//! });
//! assert_eq!(caught.unwrap_err().message(), "boom 1");
//!
//! force_release_all();
//! assert_eq!(scope_stats().allocations, 0);
//! pop_scope();
//! ```

#![deny(unsafe_code)]

pub mod alloc;
mod block;
pub mod config;
mod context;
pub mod diag;
pub mod error;
mod list;
pub mod resource;
pub mod runtime;
pub mod scope;
pub mod signal;
pub mod stats;
pub mod trace;

pub use alloc::{
    Allocation, allocate, duplicate, find_allocation, reallocate, release, release_all,
    release_if_present, replace, try_reallocate, try_release,
};
pub use block::BLOCK_ALIGN;
pub use config::LeakReportLevel;
pub use diag::{LeakReport, LeakedAllocation};
pub use error::ScopeError;
pub use resource::{
    Resource, ResourceHandle, register_resource, release_resource, try_unregister_resource,
    unregister_resource,
};
pub use runtime::{report_global_leaks, shutdown};
pub use scope::{
    ScopeId, ScopeStats, check, current_error, current_scope, depth, force_release_all,
    force_release_allocations, force_release_resources, pop_scope, push_scope, scope_stats,
    try_pop_scope,
};
pub use signal::{Raised, clear_protection, is_protected, protect};
pub use stats::CounterSnapshot;
pub use trace::AllocTrace;
