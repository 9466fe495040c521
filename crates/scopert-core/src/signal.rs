//! Non-local error signaling.
//!
//! Every scope is either *Fatal* or *Protected*. [`protect`] makes the current
//! scope Protected for the duration of its body by installing a catch point;
//! [`raise!`](crate::raise) in a Protected scope records the message as the
//! scope's last error and unwinds to that catch point, where it surfaces as
//! `Err(Raised)`. A raise in a Fatal scope, and every
//! [`abort_with!`](crate::abort_with), prints `<file>:<line>: <message>` to
//! stderr and aborts the process.
//!
//! Protection belongs to a scope, not to a call stack: a scope pushed inside a
//! protected body starts out Fatal, and a raise there is not caught unless
//! that scope establishes its own catch point.
//!
//! Unwinding discards locals but not tracked state. Whatever the body
//! allocated or registered is still on the scope's lists after the catch; the
//! handler either rolls it back with
//! [`force_release_all`](crate::scope::force_release_all) or leaves it to be
//! adopted by the parent scope.
//!
//! ```
//! use scopert_core::{current_error, protect, raise};
//!
//! let caught: Result<(), _> = protect(|| raise!("x={}", 5));
//! assert_eq!(caught.map_err(|e| e.into_message()), Err("x=5".to_owned()));
//! assert_eq!(current_error().as_deref(), Some("x=5"));
//! ```

use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe, Location};

use thiserror::Error;

use crate::context::{PointId, Protection, try_with_context, with_context};

/// A raise only unwinds when the build can unwind at all.
const CATCHABLE: bool = cfg!(panic = "unwind");

/// A caught catchable error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Raised {
    message: String,
    file: Cow<'static, str>,
    line: u32,
}

impl Raised {
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source file of the raise site.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn into_message(self) -> String {
        self.message
    }
}

/// Unwind payload; only the `protect` call that owns `point` converts it.
struct Unwind {
    point: PointId,
    raised: Raised,
}

/// Puts back the protection a `protect` call superseded, on every exit path.
struct RestoreProtection {
    depth: usize,
    serial: u64,
    previous: Protection,
}

impl Drop for RestoreProtection {
    fn drop(&mut self) {
        let _ = try_with_context(|cx| cx.restore_protection(self.depth, self.serial, self.previous));
    }
}

/// Run `body` with a catch point installed on the current scope.
///
/// Returns `Ok` with the body's value if it completes, or `Err` with the raised
/// error if a raise in this scope unwound to here. Panics that are not raises,
/// and raises aimed at another catch point, continue unwinding. On every exit
/// the scope's previous protection is restored.
///
/// The body is treated as unwind safe: after a catch, only state that was
/// registered with the scope stack is meaningful.
pub fn protect<T>(body: impl FnOnce() -> T) -> Result<T, Raised> {
    let (depth, serial, point, previous) = with_context(|cx| cx.establish());
    let guard = RestoreProtection {
        depth,
        serial,
        previous,
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(body));
    drop(guard);

    match outcome {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Unwind>() {
            Ok(unwind) if unwind.point == point => Err(unwind.raised),
            Ok(unwind) => panic::resume_unwind(unwind),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// Make the current scope Fatal again.
pub fn clear_protection() {
    with_context(|cx| cx.current_mut().protection = Protection::Fatal);
}

/// Returns true if a raise in the current scope would be caught.
#[must_use]
pub fn is_protected() -> bool {
    with_context(|cx| matches!(cx.current().protection, Protection::Protected(_)))
}

/// Raise a catchable error; see [`raise!`](crate::raise).
#[track_caller]
pub fn raise_fmt(args: fmt::Arguments<'_>) -> ! {
    raise_at(Location::caller(), args)
}

/// Raise a catchable error attributed to `location`.
pub fn raise_at(location: &'static Location<'static>, args: fmt::Arguments<'_>) -> ! {
    raise_in(Cow::Borrowed(location.file()), location.line(), fmt::format(args))
}

/// Raise a catchable error attributed to `file:line`.
///
/// For callers whose source location is not a Rust [`Location`], such as
/// foreign code passing its own file and line.
pub fn raise_in(file: Cow<'static, str>, line: u32, message: String) -> ! {
    let point = try_with_context(|cx| {
        let scope = cx.current_mut();
        match scope.protection {
            Protection::Protected(point) if CATCHABLE => {
                scope.last_error = Some(message.clone());
                Some(point)
            }
            _ => None,
        }
    })
    .flatten();

    match point {
        Some(point) => panic::resume_unwind(Box::new(Unwind {
            point,
            raised: Raised {
                message,
                file,
                line,
            },
        })),
        None => fatal_in(&file, line, &message),
    }
}

/// Abort unconditionally; see [`abort_with!`](crate::abort_with).
#[track_caller]
pub fn abort_fmt(args: fmt::Arguments<'_>) -> ! {
    fatal_at(Location::caller(), &fmt::format(args))
}

/// Print `<file>:<line>: <message>` to stderr and abort the process.
pub fn fatal_at(location: &'static Location<'static>, message: &str) -> ! {
    fatal_in(location.file(), location.line(), message)
}

/// [`fatal_at`] for an explicit `file:line`.
pub fn fatal_in(file: &str, line: u32, message: &str) -> ! {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{file}:{line}: {message}");
    let _ = err.flush();
    std::process::abort()
}

/// Raise a catchable error with a formatted message.
///
/// Unwinds to the current scope's catch point, or aborts the process if the
/// current scope is not protected.
#[macro_export]
macro_rules! raise {
    ($($arg:tt)+) => {
        $crate::signal::raise_fmt(::core::format_args!($($arg)+))
    };
}

/// Print the formatted message with its source location and abort.
#[macro_export]
macro_rules! abort_with {
    ($($arg:tt)+) => {
        $crate::signal::abort_fmt(::core::format_args!($($arg)+))
    };
}
