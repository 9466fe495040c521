//! Shared internal utilities for ABI adapters.

use std::borrow::Cow;
use std::ffi::{CStr, c_char};

/// File name used when a caller passes no source file.
pub(crate) const UNKNOWN_FILE: &str = "<unknown>";

/// Borrow a C string as UTF-8, replacing invalid sequences.
///
/// A null pointer yields `None`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid for
/// the returned lifetime.
pub(crate) unsafe fn c_str_lossy<'a>(ptr: *const c_char) -> Option<Cow<'a, str>> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let bytes = unsafe { CStr::from_ptr(ptr) };
    Some(bytes.to_string_lossy())
}

/// Owned message text from a C string; null becomes the empty string.
///
/// # Safety
///
/// Same contract as [`c_str_lossy`].
pub(crate) unsafe fn owned_message(ptr: *const c_char) -> String {
    // SAFETY: forwarded caller contract.
    unsafe { c_str_lossy(ptr) }
        .map(Cow::into_owned)
        .unwrap_or_default()
}

/// Owned source file name from a C string.
///
/// # Safety
///
/// Same contract as [`c_str_lossy`].
pub(crate) unsafe fn owned_file(ptr: *const c_char) -> Cow<'static, str> {
    // SAFETY: forwarded caller contract.
    match unsafe { c_str_lossy(ptr) } {
        Some(file) => Cow::Owned(file.into_owned()),
        None => Cow::Borrowed(UNKNOWN_FILE),
    }
}

/// Clamp a C line number into the range Rust locations use.
pub(crate) fn line_number(line: libc::c_ulong) -> u32 {
    u32::try_from(line).unwrap_or(u32::MAX)
}
