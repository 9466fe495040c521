//! Errors reported by the checked (`try_*`) operations.
//!
//! The unchecked operations treat every one of these as a programmer error and
//! take the fatal path instead of returning it.

use thiserror::Error;

/// Misuse of a handle or of the scope stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// The allocation was already released (or never existed on this thread).
    #[error("stale allocation handle (slot {index}, generation {generation})")]
    StaleAllocation { index: u32, generation: u32 },
    /// The resource was already unregistered or force-released.
    #[error("stale resource handle (slot {index}, generation {generation})")]
    StaleResource { index: u32, generation: u32 },
    /// The handle belongs to another thread's scope chain.
    #[error("handle owned by thread #{owner} used on thread #{current}")]
    ForeignThread { owner: u64, current: u64 },
    /// The root scope can only be torn down by runtime shutdown.
    #[error("cannot pop the root scope")]
    RootScope,
    /// A payload access fell outside the allocation.
    #[error("access of {len} bytes at offset {offset} overflows allocation of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    /// The address is not the payload of a live tracked allocation.
    #[error("address {addr:#x} is not a tracked allocation")]
    UnknownAddress { addr: usize },
    /// The token was never issued on this thread, or its resource is gone.
    #[error("resource token {token} is not live on this thread")]
    UnknownToken { token: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_handle() {
        let err = ScopeError::StaleAllocation {
            index: 3,
            generation: 7,
        };
        assert_eq!(
            err.to_string(),
            "stale allocation handle (slot 3, generation 7)"
        );
        assert_eq!(
            ScopeError::UnknownAddress { addr: 0x10 }.to_string(),
            "address 0x10 is not a tracked allocation"
        );
        assert_eq!(ScopeError::RootScope.to_string(), "cannot pop the root scope");
    }
}
