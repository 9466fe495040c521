//! Integration tests: run the `harness` binary as a subprocess.
//!
//! Fatal paths abort the process, so they can only be observed from outside.

use std::process::{Command, Output};

use scopert_harness::structured_log::validate_log_line;

fn harness(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(args)
        .env("SCOPERT_LEAK_REPORT", "summary")
        .output()
        .expect("failed to launch harness binary")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn stdout_entries(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            validate_log_line(line, i + 1).expect("stdout line should match the log schema");
            serde_json::from_str(line).expect("stdout line should be valid json")
        })
        .collect()
}

#[cfg(unix)]
fn assert_aborted(output: &Output) {
    use std::os::unix::process::ExitStatusExt;
    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "expected SIGABRT, got {:?}\nstderr={}",
        output.status,
        stderr(output)
    );
}

#[cfg(not(unix))]
fn assert_aborted(output: &Output) {
    assert!(!output.status.success(), "expected abnormal exit");
}

#[test]
fn unprotected_raise_aborts_with_location_and_message() {
    let output = harness(&["raise-unprotected", "--message", "x=5 went wrong"]);
    assert_aborted(&output);
    let err = stderr(&output);
    assert!(err.contains(": x=5 went wrong"), "stderr={err}");
    assert!(err.contains("harness.rs:"), "location missing: {err}");
}

#[test]
fn abort_with_is_not_caught_by_protect() {
    let output = harness(&["abort", "--message", "invariant violated: depth"]);
    assert_aborted(&output);
    assert!(stderr(&output).contains("invariant violated: depth"));
}

#[test]
fn popping_root_scope_aborts() {
    let output = harness(&["pop-root"]);
    assert_aborted(&output);
    assert!(stderr(&output).contains("cannot pop the root scope"));
}

#[test]
fn foreign_resource_token_aborts() {
    let output = harness(&["foreign-token"]);
    assert_aborted(&output);
    assert!(
        stderr(&output).contains("is not live on this thread"),
        "stderr={}",
        stderr(&output)
    );
}

fn leak_lines(output: &Output) -> Vec<String> {
    stderr(output)
        .lines()
        .filter(|line| line.starts_with("scopert:"))
        .map(str::to_owned)
        .collect()
}

#[test]
fn pop_transfers_silently_and_only_shutdown_reports() {
    let output = harness(&["scenario", "transfer"]);
    assert!(output.status.success(), "stderr={}", stderr(&output));
    assert_eq!(
        leak_lines(&output),
        vec!["scopert: shutdown: leaked 1 allocation(s) holding 16 bytes, 1 resource(s)".to_string()]
    );

    let output = harness(&["leak", "--allocations", "2", "--bytes", "4"]);
    assert!(output.status.success(), "stderr={}", stderr(&output));
    assert_eq!(
        leak_lines(&output),
        vec!["scopert: shutdown: leaked 2 allocation(s) holding 8 bytes, 0 resource(s)".to_string()]
    );
}

#[test]
fn all_scenarios_pass_and_log_jsonl() {
    let output = harness(&["--run-id", "cli", "all"]);
    assert!(output.status.success(), "stderr={}", stderr(&output));

    let entries = stdout_entries(&output);
    let ends: Vec<_> = entries
        .iter()
        .filter(|e| e["event"] == "scenario_end")
        .collect();
    assert_eq!(ends.len(), 4);
    assert!(ends.iter().all(|e| e["outcome"] == "pass"));
    assert!(entries.iter().all(|e| {
        e["trace_id"]
            .as_str()
            .is_some_and(|id| id.starts_with("cli::"))
    }));

    // The transfer scenario deliberately leaves state for shutdown to report.
    assert!(
        stderr(&output).contains("scopert: shutdown: leaked 1 allocation(s) holding 16 bytes, 1 resource(s)"),
        "stderr={}",
        stderr(&output)
    );
}

#[test]
fn leak_report_can_be_silenced() {
    let output = harness(&["--leak-report", "off", "leak", "--allocations", "2"]);
    assert!(output.status.success());
    assert!(!stderr(&output).contains("leaked"));

    let entries = stdout_entries(&output);
    let shutdown = entries
        .iter()
        .find(|e| e["event"] == "shutdown")
        .expect("shutdown entry");
    assert_eq!(shutdown["details"]["allocations"], 2);
    assert_eq!(shutdown["details"]["bytes"], 32);
}

#[test]
fn leak_report_summary_goes_to_stderr() {
    let output = harness(&["leak", "--allocations", "3", "--bytes", "8"]);
    assert!(output.status.success());
    assert!(
        stderr(&output).contains("scopert: shutdown: leaked 3 allocation(s) holding 24 bytes"),
        "stderr={}",
        stderr(&output)
    );
}

#[test]
fn stress_run_settles_global_counters() {
    let output = harness(&["stress", "--threads", "4", "--iterations", "200"]);
    assert!(output.status.success(), "stderr={}", stderr(&output));

    let entries = stdout_entries(&output);
    let workers = entries
        .iter()
        .filter(|e| e["event"] == "stress_worker")
        .count();
    assert_eq!(workers, 4);
    let end = entries
        .iter()
        .find(|e| e["event"] == "stress_end")
        .expect("stress_end entry");
    assert_eq!(end["outcome"], "pass");
}
