//! ABI layer for non-local error signaling.
//!
//! C has no closures, so a protected region is a callback plus a context
//! pointer: `scopert_try(body, ctx)` runs `body(ctx)` with a catch point on the
//! current scope. A `scopert_throw` anywhere below it on the same thread
//! unwinds back into `scopert_try`, which then returns 0. Every frame between
//! the two must be able to unwind (Rust frames, or C compiled with unwind
//! tables).

use std::ffi::{c_char, c_int, c_void};

use scopert_core::signal;

use crate::macros::abi_fn;
use crate::util::{line_number, owned_file, owned_message};

/// Body of a protected region.
pub type TryBody = unsafe extern "C-unwind" fn(ctx: *mut c_void);

abi_fn! {
    /// Run `body(ctx)` protected. Returns 1 if it completed, 0 if an error
    /// raised in this scope was caught; the message is then available from
    /// `scopert_error`.
    fn scopert_try(body: TryBody, ctx: *mut c_void) -> c_int {
        // SAFETY: the caller vouches for `body` accepting `ctx`.
        match signal::protect(|| unsafe { body(ctx) }) {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }
}

abi_fn! {
    /// Make the current scope unprotected again.
    fn scopert_unprotect() {
        signal::clear_protection();
    }
}

abi_fn! {
    /// Returns 1 if a throw in the current scope would be caught.
    fn scopert_protected() -> c_int {
        c_int::from(signal::is_protected())
    }
}

/// Raise `message` attributed to `file:line`.
///
/// Unwinds to the innermost `scopert_try` of the current scope, or aborts the
/// process when the current scope is unprotected.
///
/// # Safety
///
/// `file` and `message` must each be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn scopert_throw(
    file: *const c_char,
    line: libc::c_ulong,
    message: *const c_char,
) -> ! {
    // SAFETY: forwarded caller contract.
    let (file, message) = unsafe { (owned_file(file), owned_message(message)) };
    signal::raise_in(file, line_number(line), message)
}

/// Print `file:line: message` to stderr and abort, regardless of protection.
///
/// # Safety
///
/// `file` and `message` must each be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn scopert_fatal(
    file: *const c_char,
    line: libc::c_ulong,
    message: *const c_char,
) -> ! {
    // SAFETY: forwarded caller contract.
    let (file, message) = unsafe { (owned_file(file), owned_message(message)) };
    signal::fatal_in(&file, line_number(line), &message)
}
