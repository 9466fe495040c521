// Exports take raw pointers from C callers; each one documents its contract in
// prose, so per-function safety sections would repeat the same sentence.
#![allow(clippy::missing_safety_doc)]
//! # scopert-abi
//!
//! `extern "C-unwind"` boundary for the scopert runtime.
//!
//! This crate produces a `cdylib` exposing the tracked allocator, resource
//! registry, scope stack and error signaling to C callers. Every export is a
//! thin adapter over `scopert-core`:
//!
//! ```text
//! C caller -> ABI entry (this crate) -> scopert-core -> per-thread context
//! ```
//!
//! Pointers and resource tokens are bound to the thread that produced them.
//! Misuse (double free, unknown pointer, popping the root scope) aborts the
//! process with a `file:line: message` diagnostic, as it does in Rust callers.

mod macros;
mod util;

pub mod alloc_abi;
pub mod resource_abi;
pub mod scope_abi;
pub mod signal_abi;
