//! Integration tests for the C surface, with pipe descriptors as real
//! non-memory resources.

use std::ffi::{CStr, CString, c_int, c_void};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use scopert_abi::alloc_abi::{scopert_alloc, scopert_free};
use scopert_abi::resource_abi::{scopert_resource_add, scopert_resource_remove};
use scopert_abi::scope_abi::{
    scopert_check, scopert_clear, scopert_error, scopert_pop, scopert_push, scopert_shutdown,
};
use scopert_abi::signal_abi::{scopert_throw, scopert_try};

// Descriptor numbers are recycled process-wide; tests that assert a
// descriptor is closed must not race another test's `pipe()`.
static FD_LOCK: Mutex<()> = Mutex::new(());

fn fd_lock() -> MutexGuard<'static, ()> {
    FD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owner record registered for one pipe end.
struct PipeEnd {
    fd: c_int,
}

unsafe extern "C-unwind" fn close_pipe_end(owner: *mut c_void) {
    // SAFETY: `owner` came from `Box::into_raw` in `open_tracked_pipe`.
    let end = unsafe { Box::from_raw(owner.cast::<PipeEnd>()) };
    // SAFETY: closing a descriptor this test opened.
    unsafe { libc::close(end.fd) };
}

fn fd_is_open(fd: c_int) -> bool {
    // SAFETY: F_GETFD only queries descriptor flags.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Open a pipe and register both ends on the current scope.
fn open_tracked_pipe() -> ([c_int; 2], [u64; 2]) {
    let mut fds = [0 as c_int; 2];
    // SAFETY: `fds` has room for two descriptors.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe() failed");
    let tokens = fds.map(|fd| {
        let owner = Box::into_raw(Box::new(PipeEnd { fd }));
        // SAFETY: `owner` stays valid until `close_pipe_end` reclaims it.
        unsafe { scopert_resource_add(owner.cast(), close_pipe_end) }
    });
    (fds, tokens)
}

struct Attempt {
    fds: [c_int; 2],
    buffer: *mut c_void,
}

unsafe extern "C-unwind" fn open_then_fail(ctx: *mut c_void) {
    // SAFETY: ctx points at the caller's `Attempt`.
    let attempt = unsafe { &mut *ctx.cast::<Attempt>() };
    // SAFETY: plain allocation request.
    attempt.buffer = unsafe { scopert_alloc(16) };
    attempt.fds = open_tracked_pipe().0;

    let file = CString::new("net.c").expect("no nul");
    let message = CString::new("handshake failed").expect("no nul");
    // SAFETY: both strings are NUL-terminated and outlive the call.
    unsafe { scopert_throw(file.as_ptr(), 88, message.as_ptr()) }
}

#[test]
fn rollback_closes_descriptors_registered_before_throw() {
    let _guard = fd_lock();
    thread::spawn(|| {
        // SAFETY: every pointer passed below is produced by this test.
        unsafe {
            scopert_push();
            let mut attempt = Attempt {
                fds: [-1, -1],
                buffer: std::ptr::null_mut(),
            };
            let status = scopert_try(open_then_fail, (&raw mut attempt).cast());
            assert_eq!(status, 0);
            assert!(!attempt.buffer.is_null());
            assert!(attempt.fds.iter().all(|fd| fd_is_open(*fd)));

            let error = scopert_error();
            assert_eq!(CStr::from_ptr(error).to_str(), Ok("handshake failed"));

            scopert_clear();
            assert!(attempt.fds.iter().all(|fd| !fd_is_open(*fd)));
            assert_eq!(scopert_check(), 0);
            scopert_pop();
            assert_eq!(scopert_shutdown(), 0);
        }
    })
    .join()
    .expect("scenario thread");
}

#[test]
fn owner_that_closes_itself_unregisters_first() {
    let _guard = fd_lock();
    thread::spawn(|| {
        // SAFETY: every pointer passed below is produced by this test.
        unsafe {
            scopert_push();
            let (fds, tokens) = open_tracked_pipe();
            for (fd, token) in fds.into_iter().zip(tokens) {
                scopert_resource_remove(token);
                libc::close(fd);
            }
            scopert_clear();
            scopert_pop();
            assert_eq!(scopert_shutdown(), 0);
        }
    })
    .join()
    .expect("scenario thread");
}

#[test]
fn unreleased_state_transfers_to_parent_on_pop() {
    let _guard = fd_lock();
    thread::spawn(|| {
        // SAFETY: every pointer passed below is produced by this test.
        unsafe {
            scopert_push();
            assert_eq!(scopert_check(), 0);

            scopert_push();
            let _buffer = scopert_alloc(32);
            let (fds, _) = open_tracked_pipe();
            scopert_pop();

            assert_eq!(scopert_check(), 1);
            assert!(fds.iter().all(|fd| fd_is_open(*fd)));

            scopert_clear();
            assert!(fds.iter().all(|fd| !fd_is_open(*fd)));
            scopert_pop();
            assert_eq!(scopert_shutdown(), 0);
        }
    })
    .join()
    .expect("scenario thread");
}

#[test]
fn freed_buffers_are_not_reported() {
    thread::spawn(|| {
        // SAFETY: every pointer passed below is produced by this test.
        unsafe {
            scopert_push();
            let a = scopert_alloc(8);
            let b = scopert_alloc(8);
            scopert_free(a);
            scopert_free(b);
            scopert_pop();
            assert_eq!(scopert_shutdown(), 0);
        }
    })
    .join()
    .expect("scenario thread");
}
