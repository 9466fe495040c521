//! ABI layer for the scope stack and runtime lifecycle.

use std::cell::RefCell;
use std::ffi::{CString, c_char};

use scopert_core::{runtime, scope};

use crate::macros::abi_fn;

thread_local! {
    /// Backing storage for the pointer returned by `scopert_error`.
    static ERROR_TEXT: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn to_c_string(message: String) -> CString {
    let mut bytes = message.into_bytes();
    bytes.retain(|b| *b != 0);
    CString::new(bytes).unwrap_or_default()
}

abi_fn! {
    /// Push a new unprotected scope. Returns its depth.
    fn scopert_push() -> usize {
        scope::push_scope().depth()
    }
}

abi_fn! {
    /// Pop the current scope, transferring what it holds to the parent.
    ///
    /// Popping the root scope aborts the process.
    fn scopert_pop() {
        scope::pop_scope();
    }
}

abi_fn! {
    /// Depth of the current scope; the root is 0.
    fn scopert_depth() -> usize {
        scope::depth()
    }
}

abi_fn! {
    /// Roll back everything the current scope holds.
    fn scopert_clear() {
        scope::force_release_all();
    }
}

abi_fn! {
    /// Free every allocation the current scope holds.
    fn scopert_memclear() {
        scope::force_release_allocations();
    }
}

abi_fn! {
    /// Destroy every resource the current scope holds, most recent first.
    fn scopert_nodeclear() {
        scope::force_release_resources();
    }
}

abi_fn! {
    /// Report what the current scope holds; returns the number of tracked
    /// allocations plus registered resources (0 when clean).
    fn scopert_check() -> usize {
        let report = scope::check();
        report.allocations + report.resources
    }
}

abi_fn! {
    /// Most recent error message caught in the current scope, or null.
    ///
    /// The string stays valid until the next call on this thread.
    fn scopert_error() -> *const c_char {
        let text = scope::current_error().map(to_c_string);
        ERROR_TEXT.with(|slot| {
            let mut slot = slot.borrow_mut();
            *slot = text;
            slot.as_ref().map_or(std::ptr::null(), |s| s.as_ptr())
        })
    }
}

abi_fn! {
    /// Tear down this thread's runtime, reporting leaks. Returns the number of
    /// leaked allocations plus leaked resources.
    fn scopert_shutdown() -> usize {
        let report = runtime::shutdown();
        report.allocations + report.resources
    }
}
