//! Scenario runner.
//!
//! Each scenario runs on a fresh thread, so it starts from an empty root scope
//! and its thread-exit teardown cannot leak into the next one. A scenario is a
//! list of named checks; the runner logs every check and fails the scenario if
//! any of them did not hold.

use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::Instant;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;

use scopert_core::{
    Raised, allocate, check, current_error, force_release_all, pop_scope, protect, push_scope,
    raise, register_resource, release, report_global_leaks, scope_stats, shutdown,
};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogLevel, Outcome};

/// Named scenarios runnable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Raise inside a protected region and read the message back.
    Catch,
    /// Raise with an allocation and a resource live, then roll back.
    Rollback,
    /// Leave entries in a popped scope and let shutdown report them.
    Transfer,
    /// Nested protected regions on one scope.
    Nested,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Catch,
        Scenario::Rollback,
        Scenario::Transfer,
        Scenario::Nested,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Scenario::Catch => "catch",
            Scenario::Rollback => "rollback",
            Scenario::Transfer => "transfer",
            Scenario::Nested => "nested",
        }
    }

    fn body(self) -> fn(&mut Checks) {
        match self {
            Scenario::Catch => catch,
            Scenario::Rollback => rollback,
            Scenario::Transfer => transfer,
            Scenario::Nested => nested,
        }
    }
}

/// One verified expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub what: String,
    pub passed: bool,
}

#[derive(Debug, Default)]
struct Checks(Vec<Check>);

impl Checks {
    fn expect(&mut self, what: &str, passed: bool) {
        self.0.push(Check {
            what: what.to_string(),
            passed,
        });
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub checks: Vec<Check>,
    pub duration_us: u64,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// Run `scenario` on a fresh thread and log each check.
pub fn run_scenario(
    scenario: Scenario,
    log: &mut LogEmitter,
) -> Result<ScenarioReport, HarnessError> {
    let start_entry = log
        .entry(LogLevel::Info, "scenario_start")
        .with_scenario(scenario.name());
    log.emit_entry(&start_entry)?;

    let started = Instant::now();
    let body = scenario.body();
    let checks = thread::spawn(move || {
        let mut checks = Checks::default();
        body(&mut checks);
        checks.0
    })
    .join()
    .map_err(|_| HarnessError::ScenarioFailed {
        scenario: scenario.name(),
        reason: "scenario thread panicked".to_string(),
    })?;
    let duration_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

    for check in &checks {
        let level = if check.passed { LogLevel::Debug } else { LogLevel::Error };
        let entry = log
            .entry(level, "check")
            .with_scenario(scenario.name())
            .with_outcome(Outcome::from_passed(check.passed))
            .with_details(json!({ "what": check.what }));
        log.emit_entry(&entry)?;
    }

    let report = ScenarioReport {
        scenario,
        checks,
        duration_us,
    };
    let end_entry = log
        .entry(LogLevel::Info, "scenario_end")
        .with_scenario(scenario.name())
        .with_outcome(Outcome::from_passed(report.passed()))
        .with_duration_us(duration_us);
    log.emit_entry(&end_entry)?;

    if let Some(failed) = report.checks.iter().find(|c| !c.passed) {
        return Err(HarnessError::ScenarioFailed {
            scenario: scenario.name(),
            reason: failed.what.clone(),
        });
    }
    Ok(report)
}

fn catch(checks: &mut Checks) {
    push_scope();
    let caught: Result<(), Raised> = protect(|| raise!("x={}", 5));
    checks.expect(
        "protect returns the raised message",
        caught.as_ref().err().map(Raised::message) == Some("x=5"),
    );
    checks.expect(
        "current_error holds the message",
        current_error().as_deref() == Some("x=5"),
    );
    pop_scope();
    checks.expect("shutdown finds nothing", shutdown().is_clean());
}

fn rollback(checks: &mut Checks) {
    let released = Rc::new(Cell::new(0_u32));
    push_scope();
    let _p = allocate(16);

    let counter = Rc::clone(&released);
    let caught: Result<(), Raised> = protect(move || {
        register_resource(move || counter.set(counter.get() + 1));
        raise!("boom {}", 1);
    });
    checks.expect("raise is caught", caught.is_err());
    checks.expect(
        "current_error is \"boom 1\"",
        current_error().as_deref() == Some("boom 1"),
    );

    force_release_all();
    checks.expect("release callback ran once", released.get() == 1);
    checks.expect("scope is empty after rollback", check().is_clean());

    pop_scope();
    checks.expect("shutdown finds nothing", shutdown().is_clean());
}

fn transfer(checks: &mut Checks) {
    let released = Rc::new(Cell::new(false));
    push_scope();
    let _p = allocate(16);
    let flag = Rc::clone(&released);
    register_resource(move || flag.set(true));
    pop_scope();

    let root = scope_stats();
    checks.expect(
        "root adopted the allocation and resource",
        (root.allocations, root.bytes, root.resources) == (1, 16, 1),
    );

    let report = shutdown();
    checks.expect(
        "shutdown reports 1 allocation, 16 bytes, 1 resource",
        (report.allocations, report.bytes, report.resources) == (1, 16, 1),
    );
    checks.expect("shutdown does not run release steps", !released.get());
}

fn nested(checks: &mut Checks) {
    push_scope();
    let mut inner_message = None;
    let outer: Result<(), Raised> = protect(|| {
        let inner: Result<(), Raised> = protect(|| raise!("inner"));
        inner_message = inner.err().map(Raised::into_message);
        raise!("outer");
    });
    checks.expect(
        "inner region caught its own raise",
        inner_message.as_deref() == Some("inner"),
    );
    checks.expect(
        "outer region caught the later raise",
        outer.err().map(Raised::into_message).as_deref() == Some("outer"),
    );
    checks.expect(
        "scope is unprotected afterwards",
        !scope_stats().protected,
    );
    pop_scope();
    checks.expect("shutdown finds nothing", shutdown().is_clean());
}

// ---------------------------------------------------------------------------
// Stress
// ---------------------------------------------------------------------------

/// Per-worker totals from a stress run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub worker: usize,
    pub raised: u64,
    pub rolled_back: u64,
    pub transferred: u64,
    /// Allocations still registered when the worker shut down.
    pub leaked_allocations: usize,
}

/// Result of a stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub workers: Vec<WorkerSummary>,
    /// Process-wide live allocations after every worker exited.
    pub live_allocations: u64,
    pub live_resources: u64,
}

impl StressReport {
    #[must_use]
    pub fn clean(&self) -> bool {
        self.live_allocations == 0 && self.live_resources == 0
    }
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed | 1 }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

fn stress_worker(worker: usize, iterations: u64, seed: u64) -> WorkerSummary {
    let mut rng = XorShift64::new(seed ^ (worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let mut summary = WorkerSummary {
        worker,
        ..WorkerSummary::default()
    };

    for _ in 0..iterations {
        push_scope();
        let fail = rng.below(4) == 0;
        let allocations = rng.below(4);
        let sizes: Vec<usize> = (0..allocations).map(|_| rng.below(512) as usize).collect();
        let caught: Result<(), Raised> = protect(|| {
            for size in &sizes {
                let a = allocate(*size);
                if *size % 3 == 0 {
                    release(a);
                }
            }
            register_resource(|| {});
            if fail {
                raise!("worker {worker} step failed");
            }
        });

        if caught.is_err() {
            summary.raised += 1;
            force_release_all();
            summary.rolled_back += 1;
        } else if rng.below(2) == 0 {
            force_release_all();
            summary.rolled_back += 1;
        } else {
            summary.transferred += 1;
        }
        pop_scope();
    }

    summary.leaked_allocations = shutdown().allocations;
    summary
}

/// Run `threads` workers of `iterations` protected steps each, then read the
/// process-wide counters.
pub fn run_stress(
    threads: usize,
    iterations: u64,
    seed: u64,
    log: &mut LogEmitter,
) -> Result<StressReport, HarnessError> {
    let handles: Vec<_> = (0..threads)
        .map(|worker| thread::spawn(move || stress_worker(worker, iterations, seed)))
        .collect();

    let mut workers = Vec::with_capacity(threads);
    for (worker, handle) in handles.into_iter().enumerate() {
        let summary = handle
            .join()
            .map_err(|_| HarnessError::WorkerPanicked { worker })?;
        let entry = log
            .entry(LogLevel::Info, "stress_worker")
            .with_worker(worker)
            .with_details(json!({
                "raised": summary.raised,
                "rolled_back": summary.rolled_back,
                "transferred": summary.transferred,
                "leaked_allocations": summary.leaked_allocations,
            }));
        log.emit_entry(&entry)?;
        workers.push(summary);
    }

    let live = report_global_leaks();
    let report = StressReport {
        workers,
        live_allocations: live.allocations,
        live_resources: live.resources,
    };
    let entry = log
        .entry(LogLevel::Info, "stress_end")
        .with_outcome(Outcome::from_passed(report.clean()))
        .with_details(json!({
            "live_allocations": report.live_allocations,
            "live_resources": report.live_resources,
        }));
    log.emit_entry(&entry)?;
    Ok(report)
}
