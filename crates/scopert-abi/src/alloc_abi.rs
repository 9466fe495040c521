//! ABI layer for the tracked allocator.
//!
//! C callers see plain payload pointers. Each pointer is mapped back to its
//! allocation handle through the owning thread's address index, so a pointer
//! must be freed on the thread that allocated it.

use std::ffi::c_void;
use std::panic::Location;

use scopert_core::{Allocation, ScopeError, alloc, find_allocation, signal};

use crate::macros::abi_fn;

#[track_caller]
fn handle_for(ptr: *mut c_void) -> Allocation {
    let location = Location::caller();
    find_allocation(ptr.cast_const().cast()).unwrap_or_else(|| {
        let err = ScopeError::UnknownAddress { addr: ptr as usize };
        signal::fatal_at(location, &err.to_string())
    })
}

abi_fn! {
    /// Allocate `size` zeroed bytes on the current scope.
    ///
    /// Never returns null: allocator refusal aborts the process.
    fn scopert_alloc(size: usize) -> *mut c_void {
        alloc::allocate(size).as_ptr().cast()
    }
}

abi_fn! {
    /// Resize a tracked allocation, re-attaching it to the current scope.
    ///
    /// A null `ptr` allocates. A pointer that is not a live tracked allocation
    /// of this thread aborts the process.
    fn scopert_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        let previous = if ptr.is_null() { None } else { Some(handle_for(ptr)) };
        alloc::reallocate(previous, size).as_ptr().cast()
    }
}

abi_fn! {
    /// Free a tracked allocation. Null or unknown pointers abort the process.
    fn scopert_free(ptr: *mut c_void) {
        alloc::release(handle_for(ptr));
    }
}

abi_fn! {
    /// Free a tracked allocation if `ptr` is not null.
    fn scopert_erase(ptr: *mut c_void) {
        if !ptr.is_null() {
            alloc::release(handle_for(ptr));
        }
    }
}

abi_fn! {
    /// Allocate a copy of `len` bytes starting at `src`.
    fn scopert_dup(src: *const c_void, len: usize) -> *mut c_void {
        let bytes = if len == 0 {
            &[][..]
        } else {
            // SAFETY: caller guarantees `src` is readable for `len` bytes.
            unsafe { std::slice::from_raw_parts(src.cast::<u8>(), len) }
        };
        alloc::duplicate(bytes).as_ptr().cast()
    }
}

abi_fn! {
    /// Payload size of a tracked allocation.
    fn scopert_size(ptr: *const c_void) -> usize {
        handle_for(ptr.cast_mut()).size()
    }
}
