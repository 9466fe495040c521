//! Runtime diagnostics configuration.
//!
//! The leak-report level is set via the `SCOPERT_LEAK_REPORT` environment
//! variable:
//! - `summary` (default): one line per leaking scope with the allocation count,
//!   byte total and resource count.
//! - `full`: the summary plus one line per leaked allocation, followed by its
//!   captured call-site trace when the `alloc-traces` feature is enabled in a
//!   debug build.
//! - `off`: leaks are still counted and returned to callers but nothing is
//!   written to stderr.
//!
//! Whether diagnostics exist at all is a build-time decision made by the
//! `diagnostics` cargo feature; see [`DIAGNOSTICS_ENABLED`].

use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable selecting the [`LeakReportLevel`].
pub const LEAK_REPORT_ENV: &str = "SCOPERT_LEAK_REPORT";

/// True when the process-wide counters and leak output are compiled in.
pub const DIAGNOSTICS_ENABLED: bool = cfg!(feature = "diagnostics");

/// Number of call-site frames kept per allocation trace.
pub const TRACE_DEPTH: usize = 16;

/// How much a leak diagnostic prints.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeakReportLevel {
    /// Count only; nothing is printed.
    Off,
    /// One summary line per leaking scope.
    #[default]
    Summary,
    /// Summary plus one line (and trace) per leaked allocation.
    Full,
}

impl LeakReportLevel {
    /// Parse from string (case-insensitive). Unknown values map to the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "quiet" | "0" => Self::Off,
            "full" | "verbose" | "trace" | "2" => Self::Full,
            _ => Self::Summary,
        }
    }

    /// Returns true if anything is written to stderr.
    #[must_use]
    pub const fn prints(self) -> bool {
        DIAGNOSTICS_ENABLED && !matches!(self, Self::Off)
    }

    /// Returns true if per-allocation detail lines are written.
    #[must_use]
    pub const fn per_allocation(self) -> bool {
        self.prints() && matches!(self, Self::Full)
    }
}

// Atomic cache: 0=unresolved, 1=Off, 2=Summary, 3=Full, 255=resolving.
static CACHED_LEVEL: AtomicU8 = AtomicU8::new(0);

const LEVEL_UNRESOLVED: u8 = 0;
const LEVEL_OFF: u8 = 1;
const LEVEL_SUMMARY: u8 = 2;
const LEVEL_FULL: u8 = 3;
const LEVEL_RESOLVING: u8 = 255;

fn level_to_u8(level: LeakReportLevel) -> u8 {
    match level {
        LeakReportLevel::Off => LEVEL_OFF,
        LeakReportLevel::Summary => LEVEL_SUMMARY,
        LeakReportLevel::Full => LEVEL_FULL,
    }
}

fn u8_to_level(v: u8) -> LeakReportLevel {
    match v {
        LEVEL_OFF => LeakReportLevel::Off,
        LEVEL_FULL => LeakReportLevel::Full,
        _ => LeakReportLevel::Summary,
    }
}

/// Get the configured leak-report level (reads the environment on first call,
/// caches thereafter).
///
/// A call that races with the first resolution sees the default level instead
/// of blocking.
#[must_use]
pub fn leak_report_level() -> LeakReportLevel {
    let cached = CACHED_LEVEL.load(Ordering::Acquire);

    if cached != LEVEL_UNRESOLVED && cached != LEVEL_RESOLVING {
        return u8_to_level(cached);
    }
    if cached == LEVEL_RESOLVING {
        return LeakReportLevel::default();
    }

    if CACHED_LEVEL
        .compare_exchange(
            LEVEL_UNRESOLVED,
            LEVEL_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_LEVEL.load(Ordering::Acquire);
        return if v != LEVEL_UNRESOLVED && v != LEVEL_RESOLVING {
            u8_to_level(v)
        } else {
            LeakReportLevel::default()
        };
    }

    let level = std::env::var(LEAK_REPORT_ENV)
        .map(|v| LeakReportLevel::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_LEVEL.store(level_to_u8(level), Ordering::Release);
    level
}

/// Override the leak-report level for the rest of the process.
pub fn set_leak_report_level(level: LeakReportLevel) {
    CACHED_LEVEL.store(level_to_u8(level), Ordering::Release);
}
