//! Tracked non-memory resources.
//!
//! A resource is anything with an explicit disposal step (a file descriptor,
//! a socket, a library handle, a lock) that should be reachable by rollback.
//! Registration moves the disposal into the current scope's resource list;
//! the owner keeps the returned [`ResourceHandle`] to take it back out when it
//! closes the resource itself.
//!
//! Any `FnOnce()` closure is a [`Resource`], which covers the common case of
//! capturing a raw handle and closing it:
//!
//! ```
//! use scopert_core::{register_resource, unregister_resource};
//!
//! let fd = 42;
//! let handle = register_resource(move || {
//!     // close(fd)
//!     let _ = fd;
//! });
//! // Closing normally: take the disposal back without running it.
//! drop(unregister_resource(handle));
//! ```

use std::panic::Location;

use crate::context::{ThreadTag, with_context};
use crate::error::ScopeError;
use crate::list::SlotKey;
use crate::signal;
use crate::stats;

/// Something that can be disposed of exactly once.
pub trait Resource {
    /// Dispose of the resource. Called at most once, with the owned value
    /// that was registered.
    fn release(self: Box<Self>);
}

impl<F: FnOnce()> Resource for F {
    fn release(self: Box<Self>) {
        (*self)()
    }
}

/// Handle to one registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    key: SlotKey,
    thread: ThreadTag,
    token: u64,
}

impl ResourceHandle {
    /// Process-unique token for callers that can only store an integer.
    ///
    /// Tokens are never reused and never 0.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.token
    }

    /// Look up a token produced by [`Self::to_raw`] on the calling thread.
    ///
    /// A token from another thread, or one whose resource was already removed
    /// or released, is fatal.
    #[track_caller]
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        let location = Location::caller();
        Self::try_from_raw(raw).unwrap_or_else(|err| signal::fatal_at(location, &err.to_string()))
    }

    /// Checked [`Self::from_raw`].
    pub fn try_from_raw(raw: u64) -> Result<Self, ScopeError> {
        with_context(|cx| {
            Ok(Self {
                key: cx.resolve_token(raw)?,
                thread: cx.tag,
                token: raw,
            })
        })
    }
}

/// Register `resource` on the current scope.
pub fn register_resource<R: Resource + 'static>(resource: R) -> ResourceHandle {
    let (key, token, thread) = with_context(|cx| {
        let (key, token) = cx.register(Box::new(resource));
        (key, token, cx.tag)
    });
    stats::note_register();
    ResourceHandle { key, thread, token }
}

/// Remove a resource from whichever scope holds it, without disposing of it.
///
/// The returned value is the registered owner; dropping it does not call
/// [`Resource::release`]. Unregistering twice is fatal.
#[track_caller]
pub fn unregister_resource(handle: ResourceHandle) -> Box<dyn Resource> {
    let location = Location::caller();
    try_unregister_resource(handle).unwrap_or_else(|err| signal::fatal_at(location, &err.to_string()))
}

/// Checked [`unregister_resource`].
pub fn try_unregister_resource(handle: ResourceHandle) -> Result<Box<dyn Resource>, ScopeError> {
    let resource = with_context(|cx| cx.unregister(handle.thread, handle.key))?;
    stats::note_unregister(1);
    Ok(resource)
}

/// Remove a resource and dispose of it now.
#[track_caller]
pub fn release_resource(handle: ResourceHandle) {
    unregister_resource(handle).release();
}
