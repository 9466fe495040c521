//! Leak reports and their stderr rendering.
//!
//! A report is always computed and returned to the caller; whether (and how
//! much of) it reaches stderr depends on [`leak_report_level`].
//!
//! [`leak_report_level`]: crate::config::leak_report_level

use std::io::Write;

use crate::config::leak_report_level;
use crate::stats::CounterSnapshot;
use crate::trace::AllocTrace;

/// One allocation still registered when its scope was checked or torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedAllocation {
    /// Payload size in bytes.
    pub size: usize,
    /// Allocation-site trace, when captured.
    pub trace: Option<AllocTrace>,
}

/// What a scope still held at the moment it was checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// Number of tracked allocations.
    pub allocations: usize,
    /// Payload bytes of those allocations.
    pub bytes: usize,
    /// Number of registered resources.
    pub resources: usize,
    /// Per-allocation detail, head of the list first.
    pub leaked: Vec<LeakedAllocation>,
}

impl LeakReport {
    /// Returns true if nothing was held.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.allocations == 0 && self.resources == 0
    }

    /// One-line summary, e.g. `1 allocation(s) holding 16 bytes, 1 resource(s)`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} allocation(s) holding {} bytes, {} resource(s)",
            self.allocations, self.bytes, self.resources
        )
    }
}

/// Write `report` to stderr if it is not clean and the configured level prints.
pub(crate) fn emit(label: &str, report: &LeakReport) {
    let level = leak_report_level();
    if report.is_clean() || !level.prints() {
        return;
    }

    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "scopert: {label}: leaked {}", report.summary());
    if level.per_allocation() {
        for leaked in &report.leaked {
            let _ = writeln!(err, "scopert:   leaked {} bytes", leaked.size);
            if let Some(trace) = &leaked.trace {
                for frame in trace.frames() {
                    let _ = writeln!(err, "scopert:     {frame}");
                }
            }
        }
    }
}

/// Write the process-wide totals to stderr if anything is still live.
pub(crate) fn emit_global(snapshot: &CounterSnapshot) {
    if snapshot.is_clear() || !leak_report_level().prints() {
        return;
    }
    let _ = writeln!(
        std::io::stderr().lock(),
        "scopert: process: leaked {} allocation(s) holding {} bytes, {} resource(s)",
        snapshot.allocations,
        snapshot.bytes,
        snapshot.resources
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report() {
        let report = LeakReport::default();
        assert!(report.is_clean());
        assert_eq!(report.summary(), "0 allocation(s) holding 0 bytes, 0 resource(s)");
    }

    #[test]
    fn resources_alone_make_a_report_dirty() {
        let report = LeakReport {
            resources: 1,
            ..LeakReport::default()
        };
        assert!(!report.is_clean());
    }
}
