//! Process-wide counters. Kept to a single test so no other test thread in
//! this binary moves the counters underneath it.

use scopert_core::{
    allocate, force_release_all, pop_scope, push_scope, reallocate, register_resource, release,
    report_global_leaks, shutdown, stats, unregister_resource,
};
use std::thread;

#[test]
fn counters_follow_live_state_across_threads() {
    let baseline = stats::snapshot();
    assert!(baseline.is_clear());

    push_scope();
    let a = allocate(10);
    let a = reallocate(Some(a), 30);
    let handle = register_resource(|| {});

    if scopert_core::config::DIAGNOSTICS_ENABLED {
        let live = stats::snapshot();
        assert_eq!(live.allocations, 1);
        assert_eq!(live.bytes, 30);
        assert_eq!(live.resources, 1);
    }

    release(a);
    drop(unregister_resource(handle));
    assert!(stats::snapshot().is_clear());

    // A worker that exits holding state is accounted for by its thread-exit
    // teardown.
    thread::spawn(|| {
        push_scope();
        let _leaked = allocate(64);
        register_resource(|| {});
    })
    .join()
    .expect("worker");
    assert!(stats::snapshot().is_clear());

    // Rollback and shutdown both settle the counters.
    let _b = allocate(5);
    register_resource(|| {});
    force_release_all();
    assert!(stats::snapshot().is_clear());

    let _c = allocate(7);
    pop_scope();
    let report = shutdown();
    assert_eq!(report.allocations, 1);
    assert!(report_global_leaks().is_clear());
}
