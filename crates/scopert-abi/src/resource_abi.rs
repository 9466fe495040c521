//! ABI layer for tracked non-memory resources.
//!
//! A C resource is an owner pointer plus a destroy callback. Registration
//! returns an opaque `u64` token; passing it back to
//! [`scopert_resource_remove`] detaches the resource without destroying it,
//! which is what the owner does when it closes the resource itself.
//!
//! Tokens are process-unique and only resolve on the registering thread; a
//! token from another thread, or one already removed or released, is fatal.

use std::ffi::c_void;

use scopert_core::{Resource, ResourceHandle, register_resource, unregister_resource};

use crate::macros::abi_fn;

/// Destroy callback of a C resource.
pub type DestroyFn = unsafe extern "C-unwind" fn(owner: *mut c_void);

struct ForeignResource {
    owner: *mut c_void,
    destroy: DestroyFn,
}

impl Resource for ForeignResource {
    fn release(self: Box<Self>) {
        // SAFETY: the registering caller promised `destroy(owner)` is valid
        // until the resource is removed or released, whichever comes first.
        unsafe { (self.destroy)(self.owner) }
    }
}

abi_fn! {
    /// Register `owner` on the current scope, to be disposed of by `destroy`
    /// on rollback. Returns the token for [`scopert_resource_remove`].
    fn scopert_resource_add(owner: *mut c_void, destroy: DestroyFn) -> u64 {
        register_resource(ForeignResource { owner, destroy }).to_raw()
    }
}

abi_fn! {
    /// Detach a resource without calling its destroy callback.
    ///
    /// Must be called on the registering thread. A foreign token, or one that
    /// was already removed or released, aborts the process.
    fn scopert_resource_remove(token: u64) {
        drop(unregister_resource(ResourceHandle::from_raw(token)));
    }
}

abi_fn! {
    /// Detach a resource and call its destroy callback now.
    fn scopert_resource_release(token: u64) {
        unregister_resource(ResourceHandle::from_raw(token)).release();
    }
}
