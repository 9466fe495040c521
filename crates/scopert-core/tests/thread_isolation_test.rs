use scopert_core::{
    Raised, ScopeError, allocate, current_error, depth, protect, push_scope, raise, scope_stats,
    shutdown, try_release,
};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

#[test]
fn each_thread_owns_an_independent_scope_chain() {
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                for _ in 0..=i {
                    push_scope();
                }
                let _block = allocate(i + 1);
                barrier.wait();

                let stats = scope_stats();
                assert_eq!(depth(), i + 1);
                assert_eq!(stats.allocations, 1);
                assert_eq!(stats.bytes, i + 1);

                let caught: Result<(), Raised> = protect(|| raise!("worker {i}"));
                assert!(caught.is_err());
                assert_eq!(current_error(), Some(format!("worker {i}")));

                shutdown().bytes
            })
        })
        .collect();

    let bytes: Vec<usize> = workers
        .into_iter()
        .map(|w| w.join().expect("worker panicked"))
        .collect();
    assert_eq!(bytes, (1..=THREADS).collect::<Vec<_>>());
}

#[test]
fn raise_never_crosses_threads() {
    thread::spawn(|| {
        push_scope();
        let outer: Result<bool, Raised> = protect(|| {
            // The spawned thread's root scope is Fatal, so it can only observe
            // its own protection state.
            thread::spawn(scopert_core::is_protected)
                .join()
                .expect("inner thread")
        });
        assert_eq!(outer, Ok(false));
        assert!(shutdown().is_clean());
    })
    .join()
    .expect("outer thread");
}

#[test]
fn allocation_handles_are_bound_to_their_thread() {
    let a = thread::spawn(|| {
        push_scope();
        allocate(4)
    })
    .join()
    .expect("allocating thread");

    assert!(matches!(
        try_release(a),
        Err(ScopeError::ForeignThread { .. })
    ));
}
