//! Black-box harness for the scopert runtime.
//!
//! This crate provides:
//! - Scenarios: end-to-end runs of protect / raise / rollback / transfer
//! - Stress: many threads churning scopes, checked against the global counters
//! - Structured logging: JSONL records for every scenario step

#![forbid(unsafe_code)]

pub mod error;
pub mod scenarios;
pub mod structured_log;

pub use error::HarnessError;
pub use scenarios::{Scenario, ScenarioReport, StressReport, run_scenario, run_stress};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
